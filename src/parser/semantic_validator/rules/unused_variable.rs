//! Rule: Unused Variable
//!
//! Reports a warning when a `var` is declared but never read.
//!
//! # Notes
//!
//! - Variables starting with `_` are exempt (convention for intentionally unused)
//! - Passing a variable as a location (`out (x)`) counts as a use: another
//!   trail or the callee may read it
//! - Assigning to a variable does not count as a use

use std::collections::HashSet;

use indexmap::IndexMap;

use crate::executor::types::ast::{Expr, Module, Span, Stmt};

use super::super::{ValidationError, ValidationRule};
use super::children;

pub struct UnusedVariableRule;

impl ValidationRule for UnusedVariableRule {
    fn id(&self) -> &'static str {
        "unused-variable"
    }

    fn description(&self) -> &'static str {
        "Variables should be read after declaration"
    }

    fn validate(&self, module: &Module, _source: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for activity in &module.activities {
            // Phase 1: declarations, in source order
            let mut declarations: IndexMap<String, Span> = IndexMap::new();
            // Phase 2: reads
            let mut usages: HashSet<String> = HashSet::new();

            let mut stack = vec![&activity.body];
            while let Some(stmt) = stack.pop() {
                collect(stmt, &mut declarations, &mut usages);
                stack.extend(children(stmt));
            }

            // Phase 3: report
            for (name, span) in declarations {
                if name.starts_with('_') || usages.contains(&name) {
                    continue;
                }
                errors.push(ValidationError::warning(
                    span,
                    format!("Variable '{}' is declared but never used", name),
                    self.id(),
                ));
            }
        }
        errors
    }
}

/// Declarations and reads of one statement (children are visited separately)
fn collect(stmt: &Stmt, declarations: &mut IndexMap<String, Span>, usages: &mut HashSet<String>) {
    match stmt {
        Stmt::Var { name, init, span, .. } => {
            declarations.entry(name.clone()).or_insert(*span);
            if let Some(e) = init {
                collect_expr_usages(e, usages);
            }
        }
        Stmt::Assign { value, .. } => collect_expr_usages(value, usages),
        Stmt::Expr { expr, .. } | Stmt::Await { test: expr, .. } => collect_expr_usages(expr, usages),
        Stmt::Run { args, outs, .. } => {
            args.iter().for_each(|a| collect_expr_usages(a, usages));
            usages.extend(outs.iter().map(|o| o.name.clone()));
        }
        Stmt::Repeat { until: Some(e), .. } | Stmt::Return { value: Some(e), .. } => {
            collect_expr_usages(e, usages)
        }
        Stmt::While { test, .. }
        | Stmt::Every { test, .. }
        | Stmt::When { test, .. }
        | Stmt::If { test, .. } => collect_expr_usages(test, usages),
        _ => {}
    }
}

/// Collect variable usages from an expression
fn collect_expr_usages(expr: &Expr, usages: &mut HashSet<String>) {
    match expr {
        Expr::Ident { name, .. } => {
            usages.insert(name.clone());
        }
        Expr::Member { object, .. } => collect_expr_usages(object, usages),
        Expr::Call { callee, args, .. } => {
            collect_expr_usages(callee, usages);
            for arg in args {
                collect_expr_usages(arg, usages);
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_expr_usages(left, usages);
            collect_expr_usages(right, usages);
        }
        Expr::LitList { elements, .. } => {
            for element in elements {
                collect_expr_usages(element, usages);
            }
        }
        // Literals don't contain variable references
        Expr::LitBool { .. } | Expr::LitNum { .. } | Expr::LitStr { .. } | Expr::LitNull { .. } => {}
    }
}
