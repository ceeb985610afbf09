use std::fmt;

use thiserror::Error;

use crate::ast::{Location, RuleKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileErrorKind {
    #[error("rule '{rule}' in module '{module}' is not linked to its module")]
    UnlinkedRule { module: String, rule: String },

    #[error("undefined function {name}")]
    UnknownFunction { name: String },

    #[error("function {name} expects {expected} argument(s), got {got}")]
    WrongArity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("var {var} is unsafe")]
    UnsafeVar { var: String },

    #[error("var {var} assigned above")]
    ReassignedVar { var: String },

    #[error("cannot assign to {target}")]
    InvalidAssignment { target: String },

    #[error("conflicting rules {path} found: {first} and {second}")]
    ConflictingRuleKinds {
        path: String,
        first: RuleKind,
        second: RuleKind,
    },

    #[error("multiple default rules {path} found")]
    MultipleDefaults { path: String },

    #[error(
        "rule {} is recursive: {}",
        path.first().map_or("", String::as_str),
        path.join(" -> ")
    )]
    Recursion { path: Vec<String> },
}

/// A single compile diagnostic. Displayed as `file:row:col: message` when the
/// offending node carries a location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub location: Option<Location>,
}

impl CompileError {
    pub(crate) fn new(kind: CompileErrorKind, location: Option<&Location>) -> Self {
        Self {
            kind,
            location: location.cloned(),
        }
    }
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "{loc}: compile error: {}", self.kind),
            None => write!(f, "compile error: {}", self.kind),
        }
    }
}

impl std::error::Error for CompileError {}

/// Every diagnostic from a failed compilation, in the order they were found.
///
/// Never empty: a compilation that produced no diagnostics succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileErrors(Vec<CompileError>);

impl CompileErrors {
    /// `Ok(())` when `errors` is empty, otherwise the whole batch.
    pub(crate) fn check(errors: Vec<CompileError>) -> Result<(), Self> {
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Self(errors))
        }
    }

    #[must_use]
    pub fn errors(&self) -> &[CompileError] {
        &self.0
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<CompileError> {
        self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CompileError> {
        self.0.iter()
    }
}

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.0.as_slice() {
            return write!(f, "{only}");
        }
        write!(f, "{} errors occurred:", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n{err}")?;
        }
        Ok(())
    }
}

impl std::error::Error for CompileErrors {}

impl<'a> IntoIterator for &'a CompileErrors {
    type Item = &'a CompileError;
    type IntoIter = std::slice::Iter<'a, CompileError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
