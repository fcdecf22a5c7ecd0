// The tagged runtime value used throughout the VM and embedded in the
// constant pool. `Rc<RefCell<_>>`, not `Arc<Mutex<_>>`: the VM is strictly
// single-threaded (spec §5), so there is nothing to synchronize and no
// reason to pay atomic-refcount/lock overhead for collections.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::errors::RuntimeError;
use crate::vm::Vm;

pub type ListRef = Rc<RefCell<Vec<Value>>>;

/// Signature shared by every native function in the registry. Natives
/// receive the VM so they can read further state (e.g. `perf_counter`'s
/// monotonic clock); `kwargs` is empty for calls made through `CALL` and
/// populated only for calls made through `CALL_KW`.
pub type NativeFn = fn(&mut Vm, &[Value], &[(String, Value)]) -> Result<Value, RuntimeError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeValue {
    pub start: i64,
    pub end: i64,
    pub step: i64,
}

#[derive(Debug)]
pub enum IteratorState {
    List { list: ListRef, index: usize },
    Range { current: i64, end: i64, step: i64 },
}

pub struct FunctionValue {
    pub name: String,
    pub arity: i64, // -1 means variadic
    pub start_ip: Option<usize>,
    pub native: Option<NativeFn>,
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("FunctionValue")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("start_ip", &self.start_ip)
            .field("native", &self.native.is_some())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(Rc<String>),
    None,
    List(ListRef),
    Range(RangeValue),
    Iterator(Rc<RefCell<IteratorState>>),
    Function(Rc<FunctionValue>),
    KwArgs(Rc<Vec<(String, Value)>>),
}

impl Value {
    pub fn str(s: impl Into<String>) -> Value {
        Value::Str(Rc::new(s.into()))
    }

    pub fn list(items: Vec<Value>) -> Value {
        Value::List(Rc::new(RefCell::new(items)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::None => "none",
            Value::List(_) => "list",
            Value::Range(_) => "range",
            Value::Iterator(_) => "iterator",
            Value::Function(_) => "function",
            Value::KwArgs(_) => "kwargs",
        }
    }

    /// Python-style truthiness (grounded on `original_source/pyle`, whose
    /// compiled-from semantics this VM follows): `none`, `false`, numeric
    /// zero, and empty strings/lists are falsy; everything else is truthy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Int(n) => *n != 0,
            Value::Float(n) => *n != 0.0,
            Value::Bool(b) => *b,
            Value::Str(s) => !s.is_empty(),
            Value::None => false,
            Value::List(l) => !l.borrow().is_empty(),
            Value::Range(_) | Value::Iterator(_) | Value::Function(_) => true,
            Value::KwArgs(m) => !m.is_empty(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(n) => Some(*n as f64),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Float(n) => Some(*n as i64),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::None, Value::None) => true,
            (Value::List(a), Value::List(b)) => {
                let a = a.borrow();
                let b = b.borrow();
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y)
            }
            (Value::Range(a), Value::Range(b)) => a == b,
            (Value::Iterator(a), Value::Iterator(b)) => Rc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            (Value::KwArgs(a), Value::KwArgs(b)) => {
                // Insertion order carries no meaning for kwargs equality, so
                // compare as order-independent key/value mappings.
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.iter().any(|(k2, v2)| k == k2 && v == v2))
            }
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Str(s) => write!(f, "{}", s),
            Value::None => write!(f, "none"),
            Value::List(l) => {
                write!(f, "[")?;
                for (i, v) in l.borrow().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    if matches!(v, Value::Str(_)) {
                        write!(f, "{:?}", v.to_string())?;
                    } else {
                        write!(f, "{}", v)?;
                    }
                }
                write!(f, "]")
            }
            Value::Range(r) => write!(f, "{}:{}:{}", r.start, r.end, r.step),
            Value::Iterator(_) => write!(f, "<iterator>"),
            Value::Function(func) => write!(f, "<fn {}>", func.name),
            Value::KwArgs(m) => {
                write!(f, "{{")?;
                for (i, (k, v)) in m.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kwargs_equality_ignores_insertion_order() {
        let a = Value::KwArgs(Rc::new(vec![("start".into(), Value::Int(1)), ("end".into(), Value::Int(4))]));
        let b = Value::KwArgs(Rc::new(vec![("end".into(), Value::Int(4)), ("start".into(), Value::Int(1))]));
        assert_eq!(a, b);
    }

    #[test]
    fn kwargs_equality_still_detects_differing_values() {
        let a = Value::KwArgs(Rc::new(vec![("start".into(), Value::Int(1))]));
        let b = Value::KwArgs(Rc::new(vec![("start".into(), Value::Int(2))]));
        assert_ne!(a, b);
    }
}
