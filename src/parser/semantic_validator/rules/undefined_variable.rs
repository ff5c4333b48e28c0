//! Rule: Undefined Variable
//!
//! Reports an error when an identifier is used that is neither a parameter,
//! a location parameter, a `var` of the same activity, nor a builtin.
//!
//! # Examples
//!
//! ```text
//! activity Main() {
//!     await (speed > 10)      // Error: 'speed' is not defined
//! }
//! ```
//!
//! # Notes
//!
//! - Variables are activity-scoped: a `var` anywhere in the activity declares
//!   the name for the whole body
//! - Function names in calls (`abs(x)`) are not variables and are not checked
//!   here; unknown functions fail at runtime

use std::collections::HashSet;

use crate::executor::stdlib::is_builtin_name;
use crate::executor::types::ast::{ActivityDecl, Expr, Module, Stmt, VarRef};

use super::super::{ValidationError, ValidationRule};
use super::children;

pub struct UndefinedVariableRule;

impl ValidationRule for UndefinedVariableRule {
    fn id(&self) -> &'static str {
        "undefined-variable"
    }

    fn description(&self) -> &'static str {
        "Variables must be declared before use"
    }

    fn validate(&self, module: &Module, _source: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for activity in &module.activities {
            let declared = declared_names(activity);
            let mut checker = Checker {
                declared: &declared,
                activity: &activity.name,
                errors: &mut errors,
                rule_id: self.id(),
            };
            checker.stmt(&activity.body);
        }
        errors
    }
}

fn declared_names(activity: &ActivityDecl) -> HashSet<String> {
    let mut names: HashSet<String> = activity.params.iter().chain(&activity.outs).cloned().collect();
    let mut stack = vec![&activity.body];
    while let Some(stmt) = stack.pop() {
        if let Stmt::Var { name, .. } = stmt {
            names.insert(name.clone());
        }
        stack.extend(children(stmt));
    }
    names
}

struct Checker<'a> {
    declared: &'a HashSet<String>,
    activity: &'a str,
    errors: &'a mut Vec<ValidationError>,
    rule_id: &'static str,
}

impl Checker<'_> {
    fn stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Var { init: Some(e), .. } => self.expr(e),
            Stmt::Assign { var, value, .. } => {
                self.var_ref(var);
                self.expr(value);
            }
            Stmt::Expr { expr, .. } | Stmt::Await { test: expr, .. } => self.expr(expr),
            Stmt::Run {
                args, outs, bind, ..
            } => {
                args.iter().for_each(|a| self.expr(a));
                outs.iter().for_each(|o| self.var_ref(o));
                if let Some(b) = bind {
                    self.var_ref(b);
                }
            }
            Stmt::Repeat { until: Some(e), .. } => self.expr(e),
            Stmt::While { test, .. }
            | Stmt::Every { test, .. }
            | Stmt::When { test, .. }
            | Stmt::If { test, .. } => self.expr(test),
            Stmt::Return { value: Some(e), .. } => self.expr(e),
            _ => {}
        }
        for child in children(stmt) {
            self.stmt(child);
        }
    }

    fn expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Ident { name, span, .. } => {
                if !self.declared.contains(name) && !is_builtin_name(name) {
                    self.errors.push(ValidationError::error(
                        *span,
                        format!("Variable '{}' is not defined in '{}'", name, self.activity),
                        self.rule_id,
                    ));
                }
            }
            Expr::Member { object, .. } => self.expr(object),
            Expr::Call { callee, args, .. } => {
                if !matches!(**callee, Expr::Ident { .. }) {
                    self.expr(callee);
                }
                args.iter().for_each(|a| self.expr(a));
            }
            Expr::BinaryOp { left, right, .. } => {
                self.expr(left);
                self.expr(right);
            }
            Expr::LitList { elements, .. } => elements.iter().for_each(|e| self.expr(e)),
            Expr::LitBool { .. } | Expr::LitNum { .. } | Expr::LitStr { .. } | Expr::LitNull { .. } => {}
        }
    }

    fn var_ref(&mut self, var: &VarRef) {
        if self.declared.contains(&var.name) {
            return;
        }
        let message = if is_builtin_name(&var.name) {
            format!("'{}' is a builtin and cannot be assigned", var.name)
        } else {
            format!("Variable '{}' is not defined in '{}'", var.name, self.activity)
        };
        self.errors
            .push(ValidationError::error(var.span, message, self.rule_id));
    }
}
