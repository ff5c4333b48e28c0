//! Validation Rules
//!
//! Each file in this module contains one validation rule:
//!
//! - `undefined_variable.rs` - Names that are neither declared nor builtin
//! - `instant_body.rs` - Suspending statements inside `exec`/`defer`
//! - `return_outside_flow.rs` - `return`/`exit` inside `exec`/`defer`
//! - `unreachable_code.rs` - Code after a statement that never completes
//! - `unused_variable.rs` - Variables declared but never read

mod instant_body;
mod return_outside_flow;
mod undefined_variable;
mod unreachable_code;
mod unused_variable;

pub use instant_body::InstantBodyRule;
pub use return_outside_flow::ReturnOutsideFlowRule;
pub use undefined_variable::UndefinedVariableRule;
pub use unreachable_code::UnreachableCodeRule;
pub use unused_variable::UnusedVariableRule;

use crate::executor::types::ast::Stmt;

/// Direct child statements of a statement
pub(crate) fn children(stmt: &Stmt) -> Vec<&Stmt> {
    match stmt {
        Stmt::Block { body, .. } | Stmt::Exec { body, .. } => body.iter().collect(),
        Stmt::Repeat { body, .. }
        | Stmt::While { body, .. }
        | Stmt::Every { body, .. }
        | Stmt::When { body, .. }
        | Stmt::Defer { body, .. } => vec![&**body],
        Stmt::If { then_s, else_s, .. } => {
            let mut out = vec![&**then_s];
            if let Some(e) = else_s {
                out.push(&**e);
            }
            out
        }
        Stmt::Cobegin { trails, .. } => trails.iter().map(|t| &t.body).collect(),
        Stmt::Var { .. }
        | Stmt::Assign { .. }
        | Stmt::Expr { .. }
        | Stmt::Run { .. }
        | Stmt::Await { .. }
        | Stmt::Halt { .. }
        | Stmt::Return { .. } => vec![],
    }
}
