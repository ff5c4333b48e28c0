//! Semantic Validation for activity modules
//!
//! This module provides an extensible rule-based validation system that runs
//! after parsing to catch semantic errors that the grammar can't enforce.
//!
//! # Usage
//!
//! ```ignore
//! use synchro_core::parser::{parse_module, semantic_validator::validate_module};
//!
//! let module = parse_module(source, "main")?;
//! let errors = validate_module(&module, source);
//! if !errors.is_empty() {
//!     // Handle validation errors
//! }
//! ```
//!
//! # Architecture
//!
//! 1. **ValidationRule trait** - Each rule implements this trait
//! 2. **Validator** - Collects and runs all rules
//! 3. **ValidationError** - The output of validation (errors, warnings, hints)
//!
//! # Adding a New Rule
//!
//! 1. Create a new file in `semantic_validator/rules/`
//! 2. Implement `ValidationRule` for your struct
//! 3. Add it to the `Validator::new()` constructor

pub mod rules;

use crate::executor::types::ast::{Module, Span};

// ============================================================================
// Validation Error Types
// ============================================================================

/// A validation error produced by semantic analysis.
///
/// Independent of any output format so both the CLI and the controller can
/// report it.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationError {
    /// The source location of the issue
    pub span: Span,
    /// Human-readable message
    pub message: String,
    /// Severity level
    pub severity: Severity,
    /// Which rule produced this error
    pub rule_id: &'static str,
}

/// Severity levels for validation errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Must be fixed - the program cannot run
    Error,
    /// Should probably be fixed - potential bug
    Warning,
}

impl ValidationError {
    pub fn error(span: Span, message: impl Into<String>, rule_id: &'static str) -> Self {
        Self {
            span,
            message: message.into(),
            severity: Severity::Error,
            rule_id,
        }
    }

    pub fn warning(span: Span, message: impl Into<String>, rule_id: &'static str) -> Self {
        Self {
            span,
            message: message.into(),
            severity: Severity::Warning,
            rule_id,
        }
    }

    /// Check if this is an error (not a warning)
    pub fn is_error(&self) -> bool {
        matches!(self.severity, Severity::Error)
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let severity = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(
            f,
            "{} at line {}, col {}: {} [{}]",
            severity,
            self.span.start_line + 1,
            self.span.start_col + 1,
            self.message,
            self.rule_id
        )
    }
}

impl std::error::Error for ValidationError {}

// ============================================================================
// ValidationRule Trait
// ============================================================================

/// Trait that all validation rules must implement.
///
/// Rules are independent of each other and check one aspect of a module.
pub trait ValidationRule: Send + Sync {
    /// Unique identifier for this rule (e.g., "undefined-variable")
    fn id(&self) -> &'static str;

    /// Human-readable description of what this rule checks
    fn description(&self) -> &'static str;

    /// Run the validation and return any errors found.
    fn validate(&self, module: &Module, source: &str) -> Vec<ValidationError>;
}

// ============================================================================
// Validator - Runs All Rules
// ============================================================================

/// The main validator that orchestrates all validation rules.
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
}

impl Validator {
    /// Create a new validator with all built-in rules.
    pub fn new() -> Self {
        Self {
            rules: vec![
                // Error rules - the program cannot run
                Box::new(rules::UndefinedVariableRule),
                Box::new(rules::InstantBodyRule),
                Box::new(rules::ReturnOutsideFlowRule),
                // Warning rules
                Box::new(rules::UnreachableCodeRule),
                Box::new(rules::UnusedVariableRule),
            ],
        }
    }

    /// Run all validation rules and collect errors, ordered by position.
    pub fn validate(&self, module: &Module, source: &str) -> Vec<ValidationError> {
        let mut errors: Vec<ValidationError> = self
            .rules
            .iter()
            .flat_map(|rule| rule.validate(module, source))
            .collect();
        errors.sort_by_key(|e| (e.span.start_line, e.span.start_col));
        errors
    }

    /// All registered rules as (id, description)
    pub fn rules(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.rules.iter().map(|r| (r.id(), r.description()))
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Validate a module and return everything found.
pub fn validate_module(module: &Module, source: &str) -> Vec<ValidationError> {
    Validator::new().validate(module, source)
}

/// Check if a module has any validation errors (not just warnings).
pub fn has_errors(module: &Module, source: &str) -> bool {
    validate_module(module, source).iter().any(|e| e.is_error())
}

#[cfg(test)]
mod tests;
