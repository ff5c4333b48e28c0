//! Rule: Unreachable Code
//!
//! Reports a warning for statements that follow, in the same block, a
//! statement that never completes: `halt`, `await (false)`, `return`/`exit`,
//! a `repeat` without `until`, or an `every`/`always` loop.
//!
//! Only the first unreachable statement of each block is reported.

use crate::executor::types::ast::{Module, Stmt};

use super::super::{ValidationError, ValidationRule};
use super::children;

pub struct UnreachableCodeRule;

impl ValidationRule for UnreachableCodeRule {
    fn id(&self) -> &'static str {
        "unreachable-code"
    }

    fn description(&self) -> &'static str {
        "Code after a statement that never completes is never executed"
    }

    fn validate(&self, module: &Module, _source: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for activity in &module.activities {
            let mut stack = vec![&activity.body];
            while let Some(stmt) = stack.pop() {
                if let Stmt::Block { body, .. } | Stmt::Exec { body, .. } = stmt {
                    check_block(body, &mut errors, self.id());
                }
                stack.extend(children(stmt));
            }
        }
        errors
    }
}

fn check_block(body: &[Stmt], errors: &mut Vec<ValidationError>, rule_id: &'static str) {
    let Some(pos) = body.iter().position(|s| never_completes(s).is_some()) else {
        return;
    };
    if let (Some(next), Some(keyword)) = (body.get(pos + 1), never_completes(&body[pos])) {
        errors.push(ValidationError::warning(
            next.span(),
            format!("Unreachable code after '{}'", keyword),
            rule_id,
        ));
    }
}

fn never_completes(stmt: &Stmt) -> Option<&'static str> {
    match stmt {
        Stmt::Halt { .. } => Some("halt"),
        s if s.halts_forever() => Some("await (false)"),
        Stmt::Return { .. } => Some("return"),
        Stmt::Repeat { until: None, .. } => Some("repeat"),
        Stmt::Every { .. } => Some("every"),
        _ => None,
    }
}
