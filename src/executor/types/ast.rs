//! Abstract Syntax Tree node types
//!
//! Activity bodies are explicit statement trees built once at definition time.
//! Name resolution (`slot`, `target`) is filled in by the registry linker.

use serde::{Deserialize, Serialize};

use crate::executor::stdlib::primitives::Primitive;

/// Source location span for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Span {
    /// Start byte offset
    pub start: usize,
    /// End byte offset
    pub end: usize,
    /// Start line (0-indexed)
    pub start_line: usize,
    /// Start column (0-indexed)
    pub start_col: usize,
    /// End line (0-indexed)
    pub end_line: usize,
    /// End column (0-indexed)
    pub end_col: usize,
}

impl Span {
    pub fn new(
        start: usize,
        end: usize,
        start_line: usize,
        start_col: usize,
        end_line: usize,
        end_col: usize,
    ) -> Self {
        Self {
            start,
            end,
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }

    /// Create a span that covers both self and other
    pub fn merge(&self, other: &Span) -> Span {
        let (start_line, start_col) = if self.start <= other.start {
            (self.start_line, self.start_col)
        } else {
            (other.start_line, other.start_col)
        };
        let (end_line, end_col) = if self.end >= other.end {
            (self.end_line, self.end_col)
        } else {
            (other.end_line, other.end_col)
        };
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            start_line,
            start_col,
            end_line,
            end_col,
        }
    }
}

pub(crate) fn is_default_span(span: &Span) -> bool {
    *span == Span::default()
}

/// Index of an activity definition inside the registry
pub type DefId = usize;

/// What a `run` statement invokes once linked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum CallTarget {
    Activity { def: DefId },
    Primitive { primitive: Primitive },
}

/// Termination strength of a `cobegin` trail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Strength {
    Strong,
    Weak,
}

/// `every` waits one tick before the first check, `nowAndEvery` does not
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EveryMode {
    Next,
    Now,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PreemptMode {
    /// Tear the body down and terminate the construct
    Abort,
    /// Tear the body down and start it again
    Reset,
}

/// A variable named at a binding site (assignment target, location argument)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slot: Option<u32>,
    #[serde(default, skip_serializing_if = "is_default_span")]
    pub span: Span,
}

/// One branch of a `cobegin`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailDecl {
    pub strength: Strength,
    pub body: Stmt,
    #[serde(default, skip_serializing_if = "is_default_span")]
    pub span: Span,
}

/// Statement node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Stmt {
    Block {
        body: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// Immediate effects that never suspend
    Exec {
        body: Vec<Stmt>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Var {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slot: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        init: Option<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Assign {
        var: VarRef,
        value: Expr,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Expr {
        expr: Expr,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Run {
        activity: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        args: Vec<Expr>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        outs: Vec<VarRef>,
        /// Variable receiving the callee's terminal value
        #[serde(default, skip_serializing_if = "Option::is_none")]
        bind: Option<VarRef>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target: Option<CallTarget>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Await {
        test: Expr,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Halt {
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Repeat {
        body: Box<Stmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        until: Option<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Every {
        mode: EveryMode,
        test: Expr,
        body: Box<Stmt>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    If {
        test: Expr,
        then_s: Box<Stmt>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        else_s: Option<Box<Stmt>>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Cobegin {
        trails: Vec<TrailDecl>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    When {
        mode: PreemptMode,
        test: Expr,
        body: Box<Stmt>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Defer {
        body: Box<Stmt>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// `return` and `exit` share this node
    Return {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
}

impl Stmt {
    pub fn span(&self) -> Span {
        match self {
            Stmt::Block { span, .. }
            | Stmt::Exec { span, .. }
            | Stmt::Var { span, .. }
            | Stmt::Assign { span, .. }
            | Stmt::Expr { span, .. }
            | Stmt::Run { span, .. }
            | Stmt::Await { span, .. }
            | Stmt::Halt { span }
            | Stmt::Repeat { span, .. }
            | Stmt::While { span, .. }
            | Stmt::Every { span, .. }
            | Stmt::If { span, .. }
            | Stmt::Cobegin { span, .. }
            | Stmt::When { span, .. }
            | Stmt::Defer { span, .. }
            | Stmt::Return { span, .. } => *span,
        }
    }

    /// True for statements that can never suspend a trail
    pub fn is_instant(&self) -> bool {
        match self {
            Stmt::Var { .. } | Stmt::Assign { .. } | Stmt::Expr { .. } => true,
            Stmt::Block { body, .. } | Stmt::Exec { body, .. } => {
                body.iter().all(Stmt::is_instant)
            }
            Stmt::If { then_s, else_s, .. } => {
                then_s.is_instant() && else_s.as_ref().map_or(true, |s| s.is_instant())
            }
            _ => false,
        }
    }

    /// Permanent suspension: `halt` and `await (false)` are the same statement
    pub fn halts_forever(&self) -> bool {
        match self {
            Stmt::Halt { .. } => true,
            Stmt::Await {
                test: Expr::LitBool { v: false, .. },
                ..
            } => true,
            _ => false,
        }
    }
}

/// Short-circuiting binary operators (the rest are desugared into calls)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinaryOp {
    And,
    Or,
}

/// Expression node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t")]
pub enum Expr {
    LitBool {
        v: bool,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    LitNum {
        v: f64,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    LitStr {
        v: String,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    LitNull {
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    LitList {
        elements: Vec<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    /// Variable (slot resolved at link time) or builtin name (no slot)
    Ident {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slot: Option<u32>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Member {
        object: Box<Expr>,
        property: String,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
    BinaryOp {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
        #[serde(default, skip_serializing_if = "is_default_span")]
        span: Span,
    },
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::LitBool { span, .. }
            | Expr::LitNum { span, .. }
            | Expr::LitStr { span, .. }
            | Expr::LitNull { span }
            | Expr::LitList { span, .. }
            | Expr::Ident { span, .. }
            | Expr::Member { span, .. }
            | Expr::Call { span, .. }
            | Expr::BinaryOp { span, .. } => *span,
        }
    }
}

/* ===================== Definitions ===================== */

/// `activity Name(params) out (outs) { body }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDecl {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outs: Vec<String>,
    pub body: Stmt,
    #[serde(default, skip_serializing_if = "is_default_span")]
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub module: String,
    #[serde(default, skip_serializing_if = "is_default_span")]
    pub span: Span,
}

/// One parsed program file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    /// `//!` lines, joined with newlines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doc: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub imports: Vec<Import>,
    pub activities: Vec<ActivityDecl>,
}

impl Module {
    pub fn activity(&self, name: &str) -> Option<&ActivityDecl> {
        self.activities.iter().find(|a| a.name == name)
    }
}
