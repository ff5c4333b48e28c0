//! Arithmetic, comparison and rounding functions
//!
//! Binary operators in programs are desugared into calls of these.

use crate::executor::errors::{self, ErrorInfo};
use crate::executor::types::Val;

fn arity(name: &str, args: &[Val], n: usize) -> Result<(), ErrorInfo> {
    if args.len() != n {
        return Err(ErrorInfo::new(
            errors::WRONG_ARG_COUNT,
            format!("{}() expects {} argument(s), got {}", name, n, args.len()),
        ));
    }
    Ok(())
}

fn number(name: &str, v: &Val) -> Result<f64, ErrorInfo> {
    v.as_num().ok_or_else(|| {
        ErrorInfo::new(
            errors::WRONG_ARG_TYPE,
            format!("{}() expects numbers, got {}", name, v.type_name()),
        )
    })
}

fn numbers(name: &str, args: &[Val]) -> Result<(f64, f64), ErrorInfo> {
    arity(name, args, 2)?;
    Ok((number(name, &args[0])?, number(name, &args[1])?))
}

fn unary(name: &str, args: &[Val], f: impl Fn(f64) -> f64) -> Result<Val, ErrorInfo> {
    arity(name, args, 1)?;
    Ok(Val::Num(f(number(name, &args[0])?)))
}

/// `+` adds numbers and concatenates when either side is a string
pub fn add(args: &[Val]) -> Result<Val, ErrorInfo> {
    arity("add", args, 2)?;
    match (&args[0], &args[1]) {
        (Val::Num(a), Val::Num(b)) => Ok(Val::Num(a + b)),
        (Val::Str(a), b) => Ok(Val::Str(format!("{}{}", a, b))),
        (a, Val::Str(b)) => Ok(Val::Str(format!("{}{}", a, b))),
        (a, b) => Err(ErrorInfo::new(
            errors::WRONG_ARG_TYPE,
            format!("cannot add {} and {}", a.type_name(), b.type_name()),
        )),
    }
}

pub fn sub(args: &[Val]) -> Result<Val, ErrorInfo> {
    let (a, b) = numbers("sub", args)?;
    Ok(Val::Num(a - b))
}

pub fn mul(args: &[Val]) -> Result<Val, ErrorInfo> {
    let (a, b) = numbers("mul", args)?;
    Ok(Val::Num(a * b))
}

/// Division by zero follows IEEE semantics
pub fn div(args: &[Val]) -> Result<Val, ErrorInfo> {
    let (a, b) = numbers("div", args)?;
    Ok(Val::Num(a / b))
}

/// Euclidean remainder, so headings wrap into `0..n`
pub fn rem(args: &[Val]) -> Result<Val, ErrorInfo> {
    let (a, b) = numbers("mod", args)?;
    Ok(Val::Num(a.rem_euclid(b)))
}

pub fn neg(args: &[Val]) -> Result<Val, ErrorInfo> {
    unary("neg", args, |x| -x)
}

pub fn eq(args: &[Val]) -> Result<Val, ErrorInfo> {
    arity("eq", args, 2)?;
    Ok(Val::Bool(args[0] == args[1]))
}

pub fn ne(args: &[Val]) -> Result<Val, ErrorInfo> {
    arity("ne", args, 2)?;
    Ok(Val::Bool(args[0] != args[1]))
}

fn compare(name: &str, args: &[Val], f: impl Fn(f64, f64) -> bool) -> Result<Val, ErrorInfo> {
    let (a, b) = numbers(name, args)?;
    Ok(Val::Bool(f(a, b)))
}

pub fn lt(args: &[Val]) -> Result<Val, ErrorInfo> {
    compare("lt", args, |a, b| a < b)
}

pub fn lte(args: &[Val]) -> Result<Val, ErrorInfo> {
    compare("lte", args, |a, b| a <= b)
}

pub fn gt(args: &[Val]) -> Result<Val, ErrorInfo> {
    compare("gt", args, |a, b| a > b)
}

pub fn gte(args: &[Val]) -> Result<Val, ErrorInfo> {
    compare("gte", args, |a, b| a >= b)
}

pub fn not(args: &[Val]) -> Result<Val, ErrorInfo> {
    arity("not", args, 1)?;
    Ok(Val::Bool(!args[0].is_truthy()))
}

pub fn abs(args: &[Val]) -> Result<Val, ErrorInfo> {
    unary("abs", args, f64::abs)
}

pub fn sqrt(args: &[Val]) -> Result<Val, ErrorInfo> {
    unary("sqrt", args, f64::sqrt)
}

pub fn floor(args: &[Val]) -> Result<Val, ErrorInfo> {
    unary("floor", args, f64::floor)
}

pub fn ceil(args: &[Val]) -> Result<Val, ErrorInfo> {
    unary("ceil", args, f64::ceil)
}

pub fn round(args: &[Val]) -> Result<Val, ErrorInfo> {
    unary("round", args, f64::round)
}

pub fn min(args: &[Val]) -> Result<Val, ErrorInfo> {
    let (a, b) = numbers("min", args)?;
    Ok(Val::Num(a.min(b)))
}

pub fn max(args: &[Val]) -> Result<Val, ErrorInfo> {
    let (a, b) = numbers("max", args)?;
    Ok(Val::Num(a.max(b)))
}
