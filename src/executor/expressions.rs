//! Expression evaluation
//!
//! Expressions are pure except for `log.*` calls. Variables are read through the
//! instance arena; builtin objects come from the reaction's frozen `Stimulus`.

use std::collections::BTreeMap;

use super::errors::{self, ErrorInfo};
use super::instance::InstanceArena;
use super::scope::InstanceId;
use super::stdlib::{self, StdlibFunc};
use super::types::ast::BinaryOp;
use super::types::{Expr, Val};
use crate::logging::{LogLevel, LogSink};

/// External state frozen for the length of one reaction
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stimulus {
    /// Last pressed key, empty if none
    pub key: String,
    /// False for reactions caused by `trigger()`
    pub clock_tick: bool,
    pub clock: u64,
    pub frequency: f64,
    /// Device failure raised during the previous reaction
    pub device_error: Option<String>,
}

/// Everything an expression can see
pub struct EvalEnv<'a> {
    pub instances: &'a InstanceArena,
    pub instance: InstanceId,
    pub stimulus: &'a Stimulus,
    pub log: &'a dyn LogSink,
}

/// Evaluate an expression to a value
pub fn eval_expr(expr: &Expr, env: &EvalEnv<'_>) -> Result<Val, ErrorInfo> {
    match expr {
        Expr::LitBool { v, .. } => Ok(Val::Bool(*v)),
        Expr::LitNum { v, .. } => Ok(Val::Num(*v)),
        Expr::LitStr { v, .. } => Ok(Val::Str(v.clone())),
        Expr::LitNull { .. } => Ok(Val::Null),
        Expr::LitList { elements, .. } => {
            let items = elements
                .iter()
                .map(|e| eval_expr(e, env))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Val::List(items))
        }

        Expr::Ident {
            slot: Some(slot), ..
        } => env.instances.read(env.instance, *slot),
        Expr::Ident { name, slot: None, .. } => builtin_object(name, env),

        Expr::Member {
            object, property, ..
        } => match eval_expr(object, env)? {
            Val::Obj(fields) => Ok(fields.get(property).cloned().unwrap_or(Val::Null)),
            other => Err(ErrorInfo::new(
                errors::WRONG_ARG_TYPE,
                format!("Cannot read '{}' of {}", property, other.type_name()),
            )),
        },

        Expr::Call { callee, args, .. } => eval_call(callee, args, env),

        Expr::BinaryOp {
            op, left, right, ..
        } => {
            let l = eval_expr(left, env)?.is_truthy();
            let v = match op {
                BinaryOp::And => l && eval_expr(right, env)?.is_truthy(),
                BinaryOp::Or => l || eval_expr(right, env)?.is_truthy(),
            };
            Ok(Val::Bool(v))
        }
    }
}

/// Evaluate a condition to a bool
pub fn eval_test(expr: &Expr, env: &EvalEnv<'_>) -> Result<bool, ErrorInfo> {
    Ok(eval_expr(expr, env)?.is_truthy())
}

fn builtin_object(name: &str, env: &EvalEnv<'_>) -> Result<Val, ErrorInfo> {
    let s = env.stimulus;
    let fields = match name {
        "pi" => return Ok(Val::Num(std::f64::consts::PI)),
        "input" => BTreeMap::from([
            ("key".to_string(), Val::Str(s.key.clone())),
            ("pressed".to_string(), Val::Bool(!s.key.is_empty())),
        ]),
        "clock" => BTreeMap::from([
            ("tick".to_string(), Val::Bool(s.clock_tick)),
            ("ticks".to_string(), Val::Num(s.clock as f64)),
            ("frequency".to_string(), Val::Num(s.frequency)),
        ]),
        "device" => BTreeMap::from([
            ("failed".to_string(), Val::Bool(s.device_error.is_some())),
            (
                "error".to_string(),
                s.device_error.clone().map_or(Val::Null, Val::Str),
            ),
        ]),
        _ => {
            return Err(ErrorInfo::new(
                errors::UNBOUND_VARIABLE,
                format!("'{}' is not a variable", name),
            ))
        }
    };
    Ok(Val::Obj(fields))
}

fn eval_call(callee: &Expr, args: &[Expr], env: &EvalEnv<'_>) -> Result<Val, ErrorInfo> {
    let values = args
        .iter()
        .map(|a| eval_expr(a, env))
        .collect::<Result<Vec<_>, _>>()?;

    match callee {
        Expr::Ident {
            name, slot: None, ..
        } => match StdlibFunc::from_name(name) {
            Some(func) => stdlib::call_stdlib_func(func, &values),
            None => Err(unknown_function(name)),
        },
        Expr::Member {
            object, property, ..
        } => match (&**object, property.as_str()) {
            (Expr::Ident { name, slot: None, .. }, method) if name == "log" => {
                let level = match method {
                    "info" => LogLevel::Info,
                    "note" => LogLevel::Note,
                    "error" => LogLevel::Error,
                    _ => return Err(unknown_function(&format!("log.{}", method))),
                };
                let message = values
                    .iter()
                    .map(Val::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                env.log.log(level, &message);
                Ok(Val::Null)
            }
            (Expr::Ident { name, slot: None, .. }, "pressedIn") if name == "input" => {
                match values.as_slice() {
                    [Val::Str(keys)] => Ok(Val::Bool(
                        !env.stimulus.key.is_empty() && keys.contains(env.stimulus.key.as_str()),
                    )),
                    [other] => Err(ErrorInfo::new(
                        errors::WRONG_ARG_TYPE,
                        format!("input.pressedIn() expects a string, got {}", other.type_name()),
                    )),
                    _ => Err(ErrorInfo::new(
                        errors::WRONG_ARG_COUNT,
                        format!("input.pressedIn() expects 1 argument, got {}", values.len()),
                    )),
                }
            }
            (_, method) => Err(unknown_function(method)),
        },
        Expr::Ident { name, .. } => Err(unknown_function(name)),
        _ => Err(ErrorInfo::new(
            errors::UNKNOWN_FUNCTION,
            "Only named functions can be called",
        )),
    }
}

fn unknown_function(name: &str) -> ErrorInfo {
    ErrorInfo::new(
        errors::UNKNOWN_FUNCTION,
        format!("Unknown function '{}'", name),
    )
}
