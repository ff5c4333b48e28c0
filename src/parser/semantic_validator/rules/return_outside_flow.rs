//! Rule: Return Outside Flow
//!
//! `return` and `exit` terminate the current activity instance, which only
//! makes sense in the activity's reactive body. Inside `exec` or `defer` there
//! is nothing to return to.

use crate::executor::types::ast::{Module, Stmt};

use super::super::{ValidationError, ValidationRule};
use super::children;

pub struct ReturnOutsideFlowRule;

impl ValidationRule for ReturnOutsideFlowRule {
    fn id(&self) -> &'static str {
        "return-outside-flow"
    }

    fn description(&self) -> &'static str {
        "return/exit may not appear inside exec or defer"
    }

    fn validate(&self, module: &Module, _source: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for activity in &module.activities {
            walk(&activity.body, None, &mut errors, self.id());
        }
        errors
    }
}

fn walk(stmt: &Stmt, inside: Option<&'static str>, errors: &mut Vec<ValidationError>, rule_id: &'static str) {
    let inside = match stmt {
        Stmt::Return { span, .. } => {
            if let Some(context) = inside {
                errors.push(ValidationError::error(
                    *span,
                    format!("return cannot be used inside {}", context),
                    rule_id,
                ));
            }
            return;
        }
        Stmt::Exec { .. } => inside.or(Some("exec")),
        Stmt::Defer { .. } => Some("defer"),
        _ => inside,
    };
    for child in children(stmt) {
        walk(child, inside, errors, rule_id);
    }
}
