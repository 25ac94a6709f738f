//! Trusted builtins and the worker threads that run them for `call`.

use crate::info;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::operand::Value;
use std::thread;

/// Builtin entry point: evaluated arguments in, result or failure reason out.
pub type Builtin = fn(&[Value]) -> Result<Value, String>;

const BUILTINS: &[(&str, Builtin)] = &[
    ("add", add),
    ("sub", sub),
    ("mul", mul),
    ("div", div),
    ("max", max),
    ("min", min),
    ("concat", concat),
    ("len", len),
    ("echo", echo),
];

/// Looks up a builtin by name.
pub fn builtin(name: &str) -> Option<Builtin> {
    BUILTINS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, f)| *f)
}

/// Runs `name` on a dedicated named thread and blocks until it finishes.
///
/// Builtin errors and panics both surface as [`VMError::AsyncWorkerFailure`].
pub fn spawn_call(name: &str, args: Vec<Value>) -> Result<Value, VMError> {
    let f = builtin(name).ok_or_else(|| VMError::AsyncWorkerFailure {
        name: name.to_string(),
        reason: "no such builtin".to_string(),
    })?;
    run_on_worker(name, f, args)
}

fn run_on_worker(name: &str, f: Builtin, args: Vec<Value>) -> Result<Value, VMError> {
    let failure = |reason: String| VMError::AsyncWorkerFailure {
        name: name.to_string(),
        reason,
    };

    info!("Spawning worker for '{name}' with {} argument(s)", args.len());
    let handle = thread::Builder::new()
        .name(format!("cellvm-call-{name}"))
        .spawn(move || f(&args))
        .map_err(|e| failure(format!("spawn failed: {e}")))?;

    match handle.join() {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(reason)) => Err(failure(reason)),
        Err(_) => Err(failure("worker panicked".to_string())),
    }
}

fn ints(name: &str, args: &[Value]) -> Result<Vec<i64>, String> {
    args.iter()
        .enumerate()
        .map(|(i, v)| match v {
            Value::Int(n) => Ok(*n),
            other => Err(format!(
                "{name} expects Int arguments, argument {i} is {}",
                other.type_name()
            )),
        })
        .collect()
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), String> {
    if args.len() != expected {
        return Err(format!(
            "{name} expects {expected} argument(s), got {}",
            args.len()
        ));
    }
    Ok(())
}

fn add(args: &[Value]) -> Result<Value, String> {
    let nums = ints("add", args)?;
    Ok(Value::Int(nums.into_iter().fold(0, i64::wrapping_add)))
}

fn sub(args: &[Value]) -> Result<Value, String> {
    let nums = ints("sub", args)?;
    let (first, rest) = nums
        .split_first()
        .ok_or_else(|| "sub expects at least one argument".to_string())?;
    Ok(Value::Int(rest.iter().fold(*first, |acc, n| acc.wrapping_sub(*n))))
}

fn mul(args: &[Value]) -> Result<Value, String> {
    let nums = ints("mul", args)?;
    Ok(Value::Int(nums.into_iter().fold(1, i64::wrapping_mul)))
}

/// Floored division; a zero divisor yields `Undefined`.
pub fn floor_div(a: i64, b: i64) -> Value {
    if b == 0 {
        return Value::Undefined;
    }
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
        Value::Int(q.wrapping_sub(1))
    } else {
        Value::Int(q)
    }
}

fn div(args: &[Value]) -> Result<Value, String> {
    arity("div", args, 2)?;
    let nums = ints("div", args)?;
    Ok(floor_div(nums[0], nums[1]))
}

fn max(args: &[Value]) -> Result<Value, String> {
    ints("max", args)?
        .into_iter()
        .max()
        .map(Value::Int)
        .ok_or_else(|| "max expects at least one argument".to_string())
}

fn min(args: &[Value]) -> Result<Value, String> {
    ints("min", args)?
        .into_iter()
        .min()
        .map(Value::Int)
        .ok_or_else(|| "min expects at least one argument".to_string())
}

fn concat(args: &[Value]) -> Result<Value, String> {
    Ok(Value::Str(args.iter().map(Value::to_output).collect()))
}

fn len(args: &[Value]) -> Result<Value, String> {
    arity("len", args, 1)?;
    match &args[0] {
        Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
        Value::List(items) => Ok(Value::Int(items.len() as i64)),
        other => Err(format!("len expects Str or List, got {}", other.type_name())),
    }
}

fn echo(args: &[Value]) -> Result<Value, String> {
    arity("echo", args, 1)?;
    Ok(args[0].clone())
}
