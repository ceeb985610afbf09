use std::fmt;

use crate::ast::Location;

/// Errors produced when parsing policy source or a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    message: String,
    location: Option<Location>,
}

impl ParseError {
    pub(crate) fn new(message: impl Into<String>, location: Option<Location>) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(loc) => write!(f, "parse error: {loc}: {}", self.message),
            None => write!(f, "parse error: {}", self.message),
        }
    }
}

impl std::error::Error for ParseError {}

/// Every file that failed in a [`parse_files`](crate::parse_files) batch.
#[derive(Debug, thiserror::Error)]
#[error("{} file(s) failed to parse: {}", .0.len(), render(.0))]
pub struct ParseErrors(pub Vec<(String, crate::bridge::SourceError)>);

fn render(errors: &[(String, crate::bridge::SourceError)]) -> String {
    errors
        .iter()
        .map(|(path, err)| format!("{path}: {err}"))
        .collect::<Vec<_>>()
        .join("; ")
}
