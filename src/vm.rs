// Stack-based virtual machine: an operand stack, a stack of lexical
// `Environment` frames, a separate globals map, a call-frame stack, and an
// instruction pointer into the current chunk. `run` is the single dispatch
// loop; it never recurses the host stack for user function calls — calls
// push a `CallFrame` and jump, so arbitrarily deep user recursion only grows
// the VM's own frame stack.

use std::cell::RefCell;
use std::rc::Rc;

use crate::bytecode::{Chunk, OpCode, Operand};
use crate::environment::{Environment, SetError};
use crate::errors::RuntimeError;
use crate::lexer::Token;
use crate::value::{IteratorState, RangeValue, Value};

struct CallFrame {
    return_ip: usize,
    stack_base: usize,
    env_depth: usize,
}

pub struct Vm {
    stack: Vec<Value>,
    envs: Vec<Environment>,
    globals: Environment,
    frames: Vec<CallFrame>,
}

impl Vm {
    pub fn new() -> Self {
        Vm { stack: Vec::new(), envs: Vec::new(), globals: Environment::new(), frames: Vec::new() }
    }

    fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> Result<Value, RuntimeError> {
        self.stack.pop().ok_or(RuntimeError::StackUnderflow)
    }

    fn const_name(chunk: &Chunk, idx: usize) -> &str {
        match &chunk.constants[idx] {
            Value::Str(s) => s.as_str(),
            _ => "",
        }
    }

    fn lookup_local(&self, name: &str) -> Option<Value> {
        self.envs.iter().rev().find_map(|env| env.get(name).cloned())
    }

    fn local_candidates(&self) -> Vec<String> {
        self.envs.iter().flat_map(|e| e.names().cloned()).collect()
    }

    fn set_local(&mut self, name: &str, value: Value, token: Option<Token>) -> Result<(), RuntimeError> {
        for env in self.envs.iter_mut().rev() {
            if env.contains(name) {
                return env.set(name, value).map_err(|e| match e {
                    SetError::Const => RuntimeError::AssignToConst { name: name.to_string(), token: token.clone() },
                    SetError::Undefined => unreachable!(),
                });
            }
        }
        Err(RuntimeError::AssignToUndefined { name: name.to_string(), token })
    }

    fn set_global(&mut self, name: &str, value: Value, token: Option<Token>) -> Result<(), RuntimeError> {
        self.globals.set(name, value).map_err(|e| match e {
            SetError::Const => RuntimeError::AssignToConst { name: name.to_string(), token },
            SetError::Undefined => RuntimeError::AssignToUndefined { name: name.to_string(), token },
        })
    }

    /// Runs a compiled chunk to completion from instruction 0. Returns the
    /// program's final value on a top-level `RETURN`/`HALT`, or the first
    /// runtime error encountered.
    pub fn run(&mut self, chunk: &Chunk) -> Result<Value, RuntimeError> {
        let mut ip: usize = 0;

        loop {
            let instr = chunk.instructions.get(ip).ok_or(RuntimeError::UnknownOpcode)?;
            let op = instr.op;
            let operand = instr.operand;
            let token = instr.token.clone();
            ip += 1;

            match op {
                OpCode::Const => {
                    let value = chunk.constants[operand.single()].clone();
                    self.push(value);
                }
                OpCode::True => self.push(Value::Bool(true)),
                OpCode::False => self.push(Value::Bool(false)),
                OpCode::NoneVal => self.push(Value::None),

                OpCode::Add => {
                    let r = self.pop()?;
                    let l = self.pop()?;
                    self.push(add_values(l, r, token)?);
                }
                OpCode::Sub => {
                    let r = self.pop()?;
                    let l = self.pop()?;
                    self.push(numeric_binop(l, r, token, |a, b| a - b, |a, b| a - b)?);
                }
                OpCode::Mul => {
                    let r = self.pop()?;
                    let l = self.pop()?;
                    self.push(numeric_binop(l, r, token, |a, b| a * b, |a, b| a * b)?);
                }
                OpCode::Div => {
                    let r = self.pop()?;
                    let l = self.pop()?;
                    self.push(divide(l, r, token)?);
                }
                OpCode::Mod => {
                    let r = self.pop()?;
                    let l = self.pop()?;
                    self.push(modulo(l, r, token)?);
                }
                OpCode::Negate => {
                    let v = self.pop()?;
                    let result = match v {
                        Value::Int(n) => Value::Int(-n),
                        Value::Float(n) => Value::Float(-n),
                        other => {
                            return Err(RuntimeError::TypeError {
                                message: format!("cannot negate {}", other.type_name()),
                                token,
                            })
                        }
                    };
                    self.push(result);
                }

                OpCode::And => {
                    let r = self.pop()?;
                    let l = self.pop()?;
                    // Pass-through, not coerced to bool: `and` yields whichever
                    // operand value decided the result.
                    self.push(if l.is_truthy() { r } else { l });
                }
                OpCode::Or => {
                    let r = self.pop()?;
                    let l = self.pop()?;
                    self.push(if l.is_truthy() { l } else { r });
                }
                OpCode::Not => {
                    let v = self.pop()?;
                    self.push(Value::Bool(!v.is_truthy()));
                }
                OpCode::Eq => {
                    let r = self.pop()?;
                    let l = self.pop()?;
                    self.push(Value::Bool(l == r));
                }
                OpCode::Neq => {
                    let r = self.pop()?;
                    let l = self.pop()?;
                    self.push(Value::Bool(l != r));
                }
                OpCode::Gt => {
                    let r = self.pop()?;
                    let l = self.pop()?;
                    self.push(compare(l, r, token, |o| o == std::cmp::Ordering::Greater)?);
                }
                OpCode::Gte => {
                    let r = self.pop()?;
                    let l = self.pop()?;
                    self.push(compare(l, r, token, |o| o != std::cmp::Ordering::Less)?);
                }
                OpCode::Lt => {
                    let r = self.pop()?;
                    let l = self.pop()?;
                    self.push(compare(l, r, token, |o| o == std::cmp::Ordering::Less)?);
                }
                OpCode::Lte => {
                    let r = self.pop()?;
                    let l = self.pop()?;
                    self.push(compare(l, r, token, |o| o != std::cmp::Ordering::Greater)?);
                }

                OpCode::DefGlobal | OpCode::DefConstGlobal => {
                    let name = Self::const_name(chunk, operand.single()).to_string();
                    let value = self.pop()?;
                    self.globals.define(&name, value, op == OpCode::DefConstGlobal);
                }
                OpCode::GetGlobal => {
                    let name = Self::const_name(chunk, operand.single()).to_string();
                    match self.globals.get(&name) {
                        Some(v) => self.push(v.clone()),
                        None => {
                            let candidates: Vec<String> = self.globals.names().cloned().collect();
                            return Err(RuntimeError::UndefinedVariable { name, token, candidates });
                        }
                    }
                }
                OpCode::SetGlobal => {
                    let name = Self::const_name(chunk, operand.single()).to_string();
                    let value = self.pop()?;
                    self.set_global(&name, value, token)?;
                }

                OpCode::DefLocal | OpCode::DefConstLocal => {
                    let name = Self::const_name(chunk, operand.single()).to_string();
                    let value = self.pop()?;
                    let is_const = op == OpCode::DefConstLocal;
                    match self.envs.last_mut() {
                        Some(env) => env.define(&name, value, is_const),
                        None => return Err(RuntimeError::StackUnderflow),
                    }
                }
                OpCode::GetLocal => {
                    let name = Self::const_name(chunk, operand.single()).to_string();
                    match self.lookup_local(&name) {
                        Some(v) => self.push(v),
                        None => {
                            let candidates = self.local_candidates();
                            return Err(RuntimeError::UndefinedVariable { name, token, candidates });
                        }
                    }
                }
                OpCode::SetLocal => {
                    let name = Self::const_name(chunk, operand.single()).to_string();
                    let value = self.pop()?;
                    self.set_local(&name, value, token)?;
                }

                OpCode::EnterScope => self.envs.push(Environment::new()),
                OpCode::ExitScope => {
                    self.envs.pop();
                }

                OpCode::Jump => ip = operand.single(),
                OpCode::JumpIfFalse => {
                    let cond = self.pop()?;
                    if !cond.is_truthy() {
                        ip = operand.single();
                    }
                }

                OpCode::Pop => {
                    self.pop()?;
                }

                OpCode::BuildList => {
                    let n = operand.single();
                    let mut items = Vec::with_capacity(n);
                    for _ in 0..n {
                        items.push(self.pop()?);
                    }
                    items.reverse();
                    self.push(Value::list(items));
                }
                OpCode::BuildRange => {
                    let step = self.pop()?;
                    let end = self.pop()?;
                    let start = self.pop()?;
                    let (start, end, step) = match (start.as_i64(), end.as_i64(), step.as_i64()) {
                        (Some(s), Some(e), Some(st)) => (s, e, st),
                        _ => return Err(RuntimeError::TypeError { message: "range bounds must be numeric".into(), token }),
                    };
                    self.push(Value::Range(RangeValue { start, end, step }));
                }
                OpCode::IndexGet => {
                    let index = self.pop()?;
                    let collection = self.pop()?;
                    self.push(index_get(&collection, &index, token)?);
                }
                OpCode::IndexSet => {
                    let value = self.pop()?;
                    let index = self.pop()?;
                    let collection = self.pop()?;
                    index_set(&collection, &index, value.clone(), token)?;
                    self.push(value);
                }
                OpCode::GetAttr => {
                    let attr = Self::const_name(chunk, operand.single()).to_string();
                    let object = self.pop()?;
                    self.push(get_attr(&object, &attr, token)?);
                }

                OpCode::IterNew => {
                    let value = self.pop()?;
                    let state = match value {
                        Value::List(list) => IteratorState::List { list, index: 0 },
                        Value::Range(r) => IteratorState::Range { current: r.start, end: r.end, step: r.step },
                        _ => return Err(RuntimeError::NotIterable { token }),
                    };
                    self.push(Value::Iterator(Rc::new(RefCell::new(state))));
                }
                OpCode::IterNextOrJump => {
                    let top = self.stack.last().cloned().ok_or(RuntimeError::StackUnderflow)?;
                    let iter_rc = match top {
                        Value::Iterator(rc) => rc,
                        _ => return Err(RuntimeError::NotAnIterator { token }),
                    };
                    let next = {
                        let mut state = iter_rc.borrow_mut();
                        match &mut *state {
                            IteratorState::List { list, index } => {
                                let items = list.borrow();
                                if *index < items.len() {
                                    let v = items[*index].clone();
                                    *index += 1;
                                    Some(v)
                                } else {
                                    None
                                }
                            }
                            IteratorState::Range { current, end, step } => {
                                let has_next = match (*step).cmp(&0) {
                                    std::cmp::Ordering::Greater => *current < *end,
                                    std::cmp::Ordering::Less => *current > *end,
                                    std::cmp::Ordering::Equal => false,
                                };
                                if has_next {
                                    let v = *current;
                                    *current += *step;
                                    Some(Value::Int(v))
                                } else {
                                    None
                                }
                            }
                        }
                    };
                    match next {
                        Some(v) => self.push(v),
                        None => {
                            self.pop()?;
                            ip = operand.single();
                        }
                    }
                }

                OpCode::Call => {
                    let n = operand.single();
                    if let Some(start_ip) = self.do_call(n, ip, token)? {
                        ip = start_ip;
                    }
                }
                OpCode::BuildKwargs => {
                    let n = operand.single();
                    let names_value = self.pop()?;
                    let names: Vec<String> = match names_value {
                        Value::List(l) => l
                            .borrow()
                            .iter()
                            .map(|v| match v {
                                Value::Str(s) => (**s).clone(),
                                _ => String::new(),
                            })
                            .collect(),
                        _ => Vec::new(),
                    };
                    let mut values = Vec::with_capacity(n);
                    for _ in 0..n {
                        values.push(self.pop()?);
                    }
                    values.reverse();
                    let pairs: Vec<(String, Value)> = names.into_iter().zip(values).collect();
                    self.push(Value::KwArgs(Rc::new(pairs)));
                }
                OpCode::CallKw => {
                    let (n_pos, _n_kw) = operand.pair();
                    self.do_call_kw(n_pos, token)?;
                }

                OpCode::Return => {
                    let retval = self.pop()?;
                    match self.frames.pop() {
                        None => return Ok(retval),
                        Some(frame) => {
                            ip = frame.return_ip;
                            self.envs.truncate(frame.env_depth);
                            self.stack.truncate(frame.stack_base);
                            self.push(retval);
                        }
                    }
                }
                OpCode::Halt => {
                    return Ok(self.stack.pop().unwrap_or(Value::None));
                }
            }
        }
    }

    /// Handles `CALL(N)`. Returns `Some(start_ip)` when a user function was
    /// entered (the caller must redirect `ip` there); `None` when a native
    /// ran to completion and pushed its own result.
    fn do_call(&mut self, n: usize, return_ip: usize, token: Option<Token>) -> Result<Option<usize>, RuntimeError> {
        if self.stack.len() < n + 1 {
            return Err(RuntimeError::StackUnderflow);
        }
        let callee_index = self.stack.len() - 1 - n;
        let callee = self.stack[callee_index].clone();
        match callee {
            Value::Function(f) => match f.native {
                Some(native_fn) => {
                    if f.arity >= 0 && f.arity as usize != n {
                        return Err(RuntimeError::WrongArity { expected: f.arity, got: n, token });
                    }
                    let args = self.stack.split_off(callee_index + 1);
                    self.stack.pop();
                    let result = native_fn(self, &args, &[])?;
                    self.push(result);
                    Ok(None)
                }
                None => {
                    if f.arity as usize != n {
                        return Err(RuntimeError::WrongArity { expected: f.arity, got: n, token });
                    }
                    let start_ip = f.start_ip.ok_or(RuntimeError::NotCallable { token: token.clone() })?;
                    self.frames.push(CallFrame { return_ip, stack_base: callee_index, env_depth: self.envs.len() });
                    Ok(Some(start_ip))
                }
            },
            _ => Err(RuntimeError::NotCallable { token }),
        }
    }

    fn do_call_kw(&mut self, n_pos: usize, token: Option<Token>) -> Result<(), RuntimeError> {
        let kwargs_value = self.pop()?;
        let kwargs: Vec<(String, Value)> = match kwargs_value {
            Value::KwArgs(m) => (*m).clone(),
            _ => return Err(RuntimeError::TypeError { message: "expected kwargs value".into(), token }),
        };
        if self.stack.len() < n_pos + 1 {
            return Err(RuntimeError::StackUnderflow);
        }
        let callee_index = self.stack.len() - 1 - n_pos;
        let callee = self.stack[callee_index].clone();
        match callee {
            Value::Function(f) => match f.native {
                Some(native_fn) => {
                    let args = self.stack.split_off(callee_index + 1);
                    self.stack.pop();
                    let result = native_fn(self, &args, &kwargs)?;
                    self.push(result);
                    Ok(())
                }
                None => Err(RuntimeError::TypeError {
                    message: "user functions do not accept keyword arguments".into(),
                    token,
                }),
            },
            _ => Err(RuntimeError::NotCallable { token }),
        }
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new()
    }
}

fn add_values(l: Value, r: Value, token: Option<Token>) -> Result<Value, RuntimeError> {
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
        (Value::Str(a), Value::Str(b)) => Ok(Value::str(format!("{}{}", a, b))),
        (Value::List(a), Value::List(b)) => {
            let mut items = a.borrow().clone();
            items.extend(b.borrow().iter().cloned());
            Ok(Value::list(items))
        }
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(x), Some(y)) => Ok(Value::Float(x + y)),
            _ => Err(RuntimeError::TypeError {
                message: format!("cannot add {} and {}", l.type_name(), r.type_name()),
                token,
            }),
        },
    }
}

fn numeric_binop(
    l: Value,
    r: Value,
    token: Option<Token>,
    int_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) -> Result<Value, RuntimeError> {
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => Ok(Value::Int(int_op(*a, *b))),
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(x), Some(y)) => Ok(Value::Float(float_op(x, y))),
            _ => Err(RuntimeError::TypeError {
                message: format!("expected numeric operands, got {} and {}", l.type_name(), r.type_name()),
                token,
            }),
        },
    }
}

fn divide(l: Value, r: Value, token: Option<Token>) -> Result<Value, RuntimeError> {
    let (x, y) = match (l.as_f64(), r.as_f64()) {
        (Some(x), Some(y)) => (x, y),
        _ => {
            return Err(RuntimeError::TypeError {
                message: format!("expected numeric operands, got {} and {}", l.type_name(), r.type_name()),
                token,
            })
        }
    };
    if y == 0.0 {
        return Err(RuntimeError::DivisionByZero { token });
    }
    Ok(Value::Float(x / y))
}

fn modulo(l: Value, r: Value, token: Option<Token>) -> Result<Value, RuntimeError> {
    match (&l, &r) {
        (Value::Int(a), Value::Int(b)) => {
            if *b == 0 {
                return Err(RuntimeError::ModuloByZero { token });
            }
            Ok(Value::Int(a % b))
        }
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(x), Some(y)) => {
                if y == 0.0 {
                    return Err(RuntimeError::ModuloByZero { token });
                }
                Ok(Value::Float(x % y))
            }
            _ => Err(RuntimeError::TypeError {
                message: format!("expected numeric operands, got {} and {}", l.type_name(), r.type_name()),
                token,
            }),
        },
    }
}

fn compare(
    l: Value,
    r: Value,
    token: Option<Token>,
    matches_ordering: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, RuntimeError> {
    let ordering = match (&l, &r) {
        (Value::Str(a), Value::Str(b)) => a.as_str().cmp(b.as_str()),
        _ => match (l.as_f64(), r.as_f64()) {
            (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
            _ => {
                return Err(RuntimeError::TypeError {
                    message: format!("cannot compare {} and {}", l.type_name(), r.type_name()),
                    token,
                })
            }
        },
    };
    Ok(Value::Bool(matches_ordering(ordering)))
}

fn index_get(collection: &Value, index: &Value, token: Option<Token>) -> Result<Value, RuntimeError> {
    match collection {
        Value::List(list) => {
            let items = list.borrow();
            let i = index
                .as_i64()
                .ok_or_else(|| RuntimeError::BadIndex { message: "list index must be an integer".into(), token: token.clone() })?;
            items
                .get(i as usize)
                .cloned()
                .ok_or(RuntimeError::BadIndex { message: format!("list index {} out of range", i), token })
        }
        Value::Str(s) => {
            let i = index
                .as_i64()
                .ok_or_else(|| RuntimeError::BadIndex { message: "string index must be an integer".into(), token: token.clone() })?;
            s.chars()
                .nth(i as usize)
                .map(|c| Value::str(c.to_string()))
                .ok_or(RuntimeError::BadIndex { message: format!("string index {} out of range", i), token })
        }
        other => Err(RuntimeError::TypeError { message: format!("{} is not indexable", other.type_name()), token }),
    }
}

fn index_set(collection: &Value, index: &Value, value: Value, token: Option<Token>) -> Result<(), RuntimeError> {
    match collection {
        Value::List(list) => {
            let i = index
                .as_i64()
                .ok_or_else(|| RuntimeError::BadIndex { message: "list index must be an integer".into(), token: token.clone() })?;
            let mut items = list.borrow_mut();
            if i < 0 || i as usize >= items.len() {
                return Err(RuntimeError::BadIndex { message: format!("list index {} out of range", i), token });
            }
            items[i as usize] = value;
            Ok(())
        }
        other => Err(RuntimeError::TypeError { message: format!("{} does not support index assignment", other.type_name()), token }),
    }
}

fn get_attr(object: &Value, attr: &str, token: Option<Token>) -> Result<Value, RuntimeError> {
    match object {
        Value::Range(r) => match attr {
            "start" => Ok(Value::Int(r.start)),
            "end" => Ok(Value::Int(r.end)),
            "step" => Ok(Value::Int(r.step)),
            _ => Err(RuntimeError::AttributeLookupFailure { attr: attr.to_string(), token }),
        },
        Value::List(l) if attr == "length" => Ok(Value::Int(l.borrow().len() as i64)),
        Value::Str(s) if attr == "length" => Ok(Value::Int(s.chars().count() as i64)),
        Value::KwArgs(m) => m
            .iter()
            .find(|(k, _)| k == attr)
            .map(|(_, v)| v.clone())
            .ok_or_else(|| RuntimeError::AttributeLookupFailure { attr: attr.to_string(), token }),
        _ => Err(RuntimeError::AttributeLookupFailure { attr: attr.to_string(), token }),
    }
}
