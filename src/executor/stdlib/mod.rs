//! Standard library
//!
//! - `math` - functions operators desugar into, plus rounding helpers
//! - `primitives` - device primitives callable with `run`
//!
//! Builtin objects (`input`, `clock`, `device`, `log`) are resolved by the
//! expression evaluator; the names live here so the linker and validator agree.

pub mod math;
pub mod primitives;

use std::collections::BTreeMap;

use super::errors::{self, ErrorInfo};
use super::types::Val;
use serde::{Deserialize, Serialize};

/// Objects readable from conditions and exec bodies
pub const BUILTIN_OBJECTS: [&str; 4] = ["input", "clock", "device", "log"];

/// Standard library function identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StdlibFunc {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Not,
    Abs,
    Min,
    Max,
    Sqrt,
    Floor,
    Ceil,
    Round,
    Str,
    Len,
    Contains,
    Rgb,
}

impl StdlibFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        let func = match name {
            "add" => StdlibFunc::Add,
            "sub" => StdlibFunc::Sub,
            "mul" => StdlibFunc::Mul,
            "div" => StdlibFunc::Div,
            "mod" => StdlibFunc::Mod,
            "neg" => StdlibFunc::Neg,
            "eq" => StdlibFunc::Eq,
            "ne" => StdlibFunc::Ne,
            "lt" => StdlibFunc::Lt,
            "lte" => StdlibFunc::Lte,
            "gt" => StdlibFunc::Gt,
            "gte" => StdlibFunc::Gte,
            "not" => StdlibFunc::Not,
            "abs" => StdlibFunc::Abs,
            "min" => StdlibFunc::Min,
            "max" => StdlibFunc::Max,
            "sqrt" => StdlibFunc::Sqrt,
            "floor" => StdlibFunc::Floor,
            "ceil" => StdlibFunc::Ceil,
            "round" => StdlibFunc::Round,
            "str" => StdlibFunc::Str,
            "len" => StdlibFunc::Len,
            "contains" => StdlibFunc::Contains,
            "rgb" => StdlibFunc::Rgb,
            _ => return None,
        };
        Some(func)
    }
}

/// True for names that resolve without a variable slot
pub fn is_builtin_name(name: &str) -> bool {
    BUILTIN_OBJECTS.contains(&name) || name == "pi" || StdlibFunc::from_name(name).is_some()
}

/// Call a standard library function with arguments
pub fn call_stdlib_func(func: StdlibFunc, args: &[Val]) -> Result<Val, ErrorInfo> {
    match func {
        StdlibFunc::Add => math::add(args),
        StdlibFunc::Sub => math::sub(args),
        StdlibFunc::Mul => math::mul(args),
        StdlibFunc::Div => math::div(args),
        StdlibFunc::Mod => math::rem(args),
        StdlibFunc::Neg => math::neg(args),
        StdlibFunc::Eq => math::eq(args),
        StdlibFunc::Ne => math::ne(args),
        StdlibFunc::Lt => math::lt(args),
        StdlibFunc::Lte => math::lte(args),
        StdlibFunc::Gt => math::gt(args),
        StdlibFunc::Gte => math::gte(args),
        StdlibFunc::Not => math::not(args),
        StdlibFunc::Abs => math::abs(args),
        StdlibFunc::Min => math::min(args),
        StdlibFunc::Max => math::max(args),
        StdlibFunc::Sqrt => math::sqrt(args),
        StdlibFunc::Floor => math::floor(args),
        StdlibFunc::Ceil => math::ceil(args),
        StdlibFunc::Round => math::round(args),
        StdlibFunc::Str => str(args),
        StdlibFunc::Len => len(args),
        StdlibFunc::Contains => contains(args),
        StdlibFunc::Rgb => rgb(args),
    }
}

fn one<'a>(name: &str, args: &'a [Val]) -> Result<&'a Val, ErrorInfo> {
    match args {
        [v] => Ok(v),
        _ => Err(ErrorInfo::new(
            errors::WRONG_ARG_COUNT,
            format!("{}() expects 1 argument, got {}", name, args.len()),
        )),
    }
}

fn str(args: &[Val]) -> Result<Val, ErrorInfo> {
    Ok(Val::Str(one("str", args)?.to_string()))
}

fn len(args: &[Val]) -> Result<Val, ErrorInfo> {
    match one("len", args)? {
        Val::Str(s) => Ok(Val::Num(s.chars().count() as f64)),
        Val::List(items) => Ok(Val::Num(items.len() as f64)),
        Val::Obj(fields) => Ok(Val::Num(fields.len() as f64)),
        other => Err(ErrorInfo::new(
            errors::WRONG_ARG_TYPE,
            format!("len() expects a string, list or object, got {}", other.type_name()),
        )),
    }
}

/// `contains(haystack, needle)`; an empty needle never matches
fn contains(args: &[Val]) -> Result<Val, ErrorInfo> {
    match args {
        [Val::Str(hay), Val::Str(needle)] => Ok(Val::Bool(!needle.is_empty() && hay.contains(needle.as_str()))),
        [Val::List(items), needle] => Ok(Val::Bool(items.contains(needle))),
        [_, _] => Err(ErrorInfo::new(
            errors::WRONG_ARG_TYPE,
            "contains() expects (string, string) or (list, value)",
        )),
        _ => Err(ErrorInfo::new(
            errors::WRONG_ARG_COUNT,
            format!("contains() expects 2 arguments, got {}", args.len()),
        )),
    }
}

fn rgb(args: &[Val]) -> Result<Val, ErrorInfo> {
    let [r, g, b] = args else {
        return Err(ErrorInfo::new(
            errors::WRONG_ARG_COUNT,
            format!("rgb() expects 3 arguments, got {}", args.len()),
        ));
    };
    let mut fields = BTreeMap::new();
    for (key, v) in [("r", r), ("g", g), ("b", b)] {
        let n = v.as_num().ok_or_else(|| {
            ErrorInfo::new(errors::WRONG_ARG_TYPE, "rgb() expects numbers")
        })?;
        fields.insert(key.to_string(), Val::Num(n.round().clamp(0.0, 255.0)));
    }
    Ok(Val::Obj(fields))
}
