//! Runtime error codes and error info
//!
//! Runtime errors are fatal to the program: the instance tree is torn down
//! (running every pending defer) and the controller reports `Failed`.

use serde::{Deserialize, Serialize};

pub const UNBOUND_VARIABLE: &str = "UNBOUND_VARIABLE";
pub const READ_ONLY_BINDING: &str = "READ_ONLY_BINDING";
pub const WRONG_ARG_COUNT: &str = "WRONG_ARG_COUNT";
pub const WRONG_ARG_TYPE: &str = "WRONG_ARG_TYPE";
pub const NOT_INSTANTANEOUS: &str = "NOT_INSTANTANEOUS";
pub const CALL_DEPTH_EXCEEDED: &str = "CALL_DEPTH_EXCEEDED";
pub const UNKNOWN_FUNCTION: &str = "UNKNOWN_FUNCTION";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Error with a stable code and a human-readable message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(INTERNAL_ERROR, message)
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ErrorInfo {}
