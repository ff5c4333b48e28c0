//! Rule: Instant Body
//!
//! `exec` and `defer` bodies run to completion inside a single step, so they
//! may only contain instantaneous statements.
//!
//! # Examples
//!
//! ```text
//! exec { await (input.pressed) }         // Error: 'await' can suspend
//! defer { run SetMainLED("black") }      // OK: device command, not awaited
//! defer { run WaitSeconds(1) }           // Error
//! ```

use crate::executor::stdlib::primitives::Primitive;
use crate::executor::types::ast::{Module, Stmt};

use super::super::{ValidationError, ValidationRule};
use super::children;

pub struct InstantBodyRule;

impl ValidationRule for InstantBodyRule {
    fn id(&self) -> &'static str {
        "instant-body"
    }

    fn description(&self) -> &'static str {
        "exec and defer bodies must not suspend"
    }

    fn validate(&self, module: &Module, _source: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();
        for activity in &module.activities {
            find_bodies(&activity.body, &mut errors, self.id());
        }
        errors
    }
}

/// Walk normal code looking for `exec`/`defer`
fn find_bodies(stmt: &Stmt, errors: &mut Vec<ValidationError>, rule_id: &'static str) {
    match stmt {
        Stmt::Exec { body, .. } => body.iter().for_each(|s| check(s, "exec", errors, rule_id)),
        Stmt::Defer { body, .. } => check(body, "defer", errors, rule_id),
        _ => children(stmt)
            .into_iter()
            .for_each(|c| find_bodies(c, errors, rule_id)),
    }
}

fn check(stmt: &Stmt, context: &'static str, errors: &mut Vec<ValidationError>, rule_id: &'static str) {
    let keyword = match stmt {
        Stmt::Var { .. } | Stmt::Assign { .. } | Stmt::Expr { .. } => return,
        // reported by return-outside-flow
        Stmt::Return { .. } => return,
        Stmt::Block { body, .. } | Stmt::Exec { body, .. } => {
            body.iter().for_each(|s| check(s, context, errors, rule_id));
            return;
        }
        Stmt::If { then_s, else_s, .. } => {
            check(then_s, context, errors, rule_id);
            if let Some(e) = else_s {
                check(e, context, errors, rule_id);
            }
            return;
        }
        Stmt::Defer { body, .. } if context == "exec" => {
            check(body, "defer", errors, rule_id);
            return;
        }
        Stmt::Run { activity, .. } if context == "defer" => {
            match Primitive::from_name(activity) {
                Some(p) if p.is_command() => return,
                _ => "run",
            }
        }
        Stmt::Run { .. } => "run",
        Stmt::Await { .. } => "await",
        Stmt::Halt { .. } => "halt",
        Stmt::Repeat { .. } => "repeat",
        Stmt::While { .. } => "while",
        Stmt::Every { .. } => "every",
        Stmt::Cobegin { .. } => "cobegin",
        Stmt::When { .. } => "when",
        Stmt::Defer { .. } => "defer",
    };

    let hint = if context == "defer" && keyword == "run" {
        " (only device commands may be issued here)"
    } else {
        ""
    };
    errors.push(ValidationError::error(
        stmt.span(),
        format!("'{}' cannot be used inside {}{}", keyword, context, hint),
        rule_id,
    ));
}
