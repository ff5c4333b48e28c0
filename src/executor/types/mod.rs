//! Type definitions for the executor
//!
//! - AST nodes (Stmt, Expr, Module)
//! - Runtime values (Val)
//! - Frames, trails and control flow
//! - Phase enums for each suspendable statement type

pub mod ast;
pub mod control;
pub mod phase;
pub mod values;

pub use ast::{Expr, Module, Stmt};
pub use control::{Child, Control, Frame, FrameKind, Trail, TrailId, TrailOutcome};
pub use phase::*;
pub use values::Val;
