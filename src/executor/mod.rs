//! Synchronous reaction engine
//!
//! Linked activity definitions run on a VM made of two arenas: activity
//! instances (scopes, defer stacks, results) and trails (frame stacks). Each
//! reaction resumes every live trail exactly once in declaration order.
//!
//! ## Organization
//! - `types` - AST, runtime values, frames and phases
//! - `registry` - module linking and name resolution
//! - `scope` / `instance` / `defer` - per-instance state
//! - `expressions` / `statements` - evaluation and statement handlers
//! - `exec_loop` - the reaction driver, preemption and teardown
//! - `stdlib` - builtin functions and device primitives

pub mod defer;
pub mod errors;
pub mod exec_loop;
pub mod expressions;
pub mod instance;
pub mod registry;
pub mod scope;
pub mod statements;
pub mod stdlib;
pub mod types;
pub mod vm;

#[cfg(test)]
mod tests;

pub use errors::ErrorInfo;
pub use expressions::Stimulus;
pub use registry::{ActivityDef, DefinitionError, Registry};
pub use types::{Expr, Module, Stmt, Val};
pub use vm::{ReactionKind, Status, VmOptions, VM};
