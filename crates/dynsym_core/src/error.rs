//! Error taxonomy and diagnostics shared by the registry, evaluator and linearizer.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Result alias used throughout the engine.
pub type Result<T> = std::result::Result<T, ModelError>;

/// Position of a node in the model source. Trees built by hand use `Span::default()`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub line: usize,
    pub column: usize,
}

impl Span {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    #[error("undefined {category} `{symbol}` at {location}")]
    UndefinedSymbol {
        category: &'static str,
        symbol: String,
        location: Span,
    },

    #[error("`{name}` is already declared as a process (at {location})")]
    Redefinition { name: String, location: Span },

    #[error("division by zero at {location}")]
    DivisionByZero { location: Span },

    #[error("invalid bounds in quantified assignment: [{lower}, {upper})")]
    InvalidQuantifierBounds { lower: String, upper: String },

    #[error("{function} is not defined at {argument}")]
    ArithmeticDomain { function: &'static str, argument: f64 },

    #[error("process descriptor misuse at {location}: {message}")]
    ProcessDescriptorMisuse { message: String, location: Span },

    #[error("cannot assign to `{target}` at {location}: {reason}")]
    InvalidAssignmentTarget {
        target: String,
        reason: &'static str,
        location: Span,
    },

    #[error("invalid numeric literal `{text}` at {location}")]
    InvalidLiteral { text: String, location: Span },

    #[error("statement at {location} does not produce a value")]
    NotAValue { location: Span },

    #[error("{function} expects {expected} argument(s), got {found}")]
    Arity {
        function: String,
        expected: usize,
        found: usize,
    },
}

impl ModelError {
    /// Attaches a location to errors raised by the numeric kernel, which has none of its own.
    pub(crate) fn at(self, location: Span) -> Self {
        match self {
            ModelError::DivisionByZero { .. } => ModelError::DivisionByZero { location },
            ModelError::ProcessDescriptorMisuse { message, .. } => {
                ModelError::ProcessDescriptorMisuse { message, location }
            }
            other => other,
        }
    }
}

/// A non-fatal message collected while evaluating a model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub location: Span,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.location, self.message)
    }
}
