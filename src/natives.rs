// Native function registry. Every entry here resolves as a global regardless
// of lexical scope depth — `is_native_name` is consulted by the compiler so
// shadowing a native with a local of the same name still resolves to the
// local (the registry only backstops names that were never declared).

use once_cell::sync::Lazy;
use std::time::Instant;

use crate::errors::RuntimeError;
use crate::value::{NativeFn, Value};
use crate::vm::Vm;

pub static NATIVES: Lazy<Vec<(&'static str, i64, NativeFn)>> = Lazy::new(|| {
    vec![
        ("echo", -1, native_echo as NativeFn),
        ("len", 1, native_len as NativeFn),
        ("scan", -1, native_scan as NativeFn),
        ("perf_counter", 0, native_perf_counter as NativeFn),
        ("range", -1, native_range as NativeFn),
        ("str", 1, native_str as NativeFn),
        ("int", 1, native_int as NativeFn),
        ("float", 1, native_float as NativeFn),
    ]
});

static CLOCK_START: Lazy<Instant> = Lazy::new(Instant::now);

pub fn is_native_name(name: &str) -> bool {
    NATIVES.iter().any(|(n, _, _)| *n == name)
}

pub fn lookup(name: &str) -> Option<(i64, NativeFn)> {
    NATIVES.iter().find(|(n, _, _)| *n == name).map(|(_, arity, f)| (*arity, *f))
}

fn native_echo(_vm: &mut Vm, args: &[Value], _kwargs: &[(String, Value)]) -> Result<Value, RuntimeError> {
    let rendered: Vec<String> = args.iter().map(|v| v.to_string()).collect();
    println!("{}", rendered.join(" "));
    Ok(Value::None)
}

fn native_len(_vm: &mut Vm, args: &[Value], _kwargs: &[(String, Value)]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::List(l) => Ok(Value::Int(l.borrow().len() as i64)),
        other => Err(RuntimeError::TypeError {
            message: format!("len() is not defined for {}", other.type_name()),
            token: None,
        }),
    }
}

fn native_scan(_vm: &mut Vm, args: &[Value], _kwargs: &[(String, Value)]) -> Result<Value, RuntimeError> {
    use std::io::Write;

    if let Some(prompt) = args.first() {
        print!("{}", prompt);
        std::io::stdout().flush().map_err(|e| RuntimeError::Io(e.to_string()))?;
    }

    let mut line = String::new();
    std::io::stdin().read_line(&mut line).map_err(|e| RuntimeError::Io(e.to_string()))?;
    Ok(Value::str(line.trim_end_matches(['\n', '\r']).to_string()))
}

fn native_perf_counter(_vm: &mut Vm, _args: &[Value], _kwargs: &[(String, Value)]) -> Result<Value, RuntimeError> {
    Ok(Value::Float(CLOCK_START.elapsed().as_secs_f64()))
}

fn native_range(_vm: &mut Vm, args: &[Value], kwargs: &[(String, Value)]) -> Result<Value, RuntimeError> {
    let kwarg = |name: &str| kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v);

    let (start, end, step) = if !kwargs.is_empty() {
        let start = kwarg("start").and_then(Value::as_i64).unwrap_or(0);
        let end = kwarg("end")
            .and_then(Value::as_i64)
            .ok_or_else(|| RuntimeError::TypeError { message: "range() requires an 'end' argument".into(), token: None })?;
        let step = kwarg("step").and_then(Value::as_i64).unwrap_or(1);
        (start, end, step)
    } else {
        match args.len() {
            1 => (0, args[0].as_i64().unwrap_or(0), 1),
            2 => (args[0].as_i64().unwrap_or(0), args[1].as_i64().unwrap_or(0), 1),
            3 => (
                args[0].as_i64().unwrap_or(0),
                args[1].as_i64().unwrap_or(0),
                args[2].as_i64().unwrap_or(1),
            ),
            n => {
                return Err(RuntimeError::WrongArity { expected: -1, got: n, token: None });
            }
        }
    };
    Ok(Value::Range(crate::value::RangeValue { start, end, step }))
}

fn native_str(_vm: &mut Vm, args: &[Value], _kwargs: &[(String, Value)]) -> Result<Value, RuntimeError> {
    Ok(Value::str(args[0].to_string()))
}

fn native_int(_vm: &mut Vm, args: &[Value], _kwargs: &[(String, Value)]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Int(*n)),
        Value::Float(n) => Ok(Value::Int(*n as i64)),
        Value::Bool(b) => Ok(Value::Int(if *b { 1 } else { 0 })),
        Value::Str(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| RuntimeError::TypeError { message: format!("cannot convert '{}' to int", s), token: None }),
        other => Err(RuntimeError::TypeError {
            message: format!("cannot convert {} to int", other.type_name()),
            token: None,
        }),
    }
}

fn native_float(_vm: &mut Vm, args: &[Value], _kwargs: &[(String, Value)]) -> Result<Value, RuntimeError> {
    match &args[0] {
        Value::Int(n) => Ok(Value::Float(*n as f64)),
        Value::Float(n) => Ok(Value::Float(*n)),
        Value::Str(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| RuntimeError::TypeError { message: format!("cannot convert '{}' to float", s), token: None }),
        other => Err(RuntimeError::TypeError {
            message: format!("cannot convert {} to float", other.type_name()),
            token: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_takes_an_optional_prompt_argument() {
        // arity -1 means "skip the exact-arity check"; scan must accept both
        // zero args (no prompt) and one (prompt to print before reading).
        let (arity, _) = lookup("scan").expect("scan must be registered");
        assert_eq!(arity, -1);
    }
}
