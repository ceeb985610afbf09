//! Table-driven rule testing.
//!
//! A [`TestCase`] compiles a handful of rule snippets into package
//! [`TEST_PACKAGE`], reads one rule, and checks the outcome against an
//! [`Expected`] value, error, or undefined result.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::equality::{ConversionError, equal, normalize};
use crate::query::{Ambiguity, QueryError, RuleValue, query_rule};
use crate::types::{CompiledSet, Store, Value};

/// JSON-level marker for an expected undefined result.
pub const UNDEFINED: &str = "---undefined---";
/// Rule read when a test case names no target.
pub const DEFAULT_TARGET: &str = "t";
/// Package test rules are compiled into.
pub const TEST_PACKAGE: &str = "testing";
/// Module id of the compiled test rules.
pub const TEST_MODULE: &str = "testMod";

#[derive(Debug, Clone, PartialEq)]
pub enum Expected {
    Value(serde_json::Value),
    /// Passes if the compile or evaluation error message contains this text.
    Error(String),
    Undefined,
}

impl Expected {
    /// Expect the canonical JSON form of `value`.
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError`] if `value` fails to serialize.
    pub fn value<T: Serialize + ?Sized>(value: &T) -> Result<Self, ConversionError> {
        normalize(value).map(Self::from)
    }
}

impl From<serde_json::Value> for Expected {
    /// The string [`UNDEFINED`] means undefined; anything else is a value.
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) if s == UNDEFINED => Expected::Undefined,
            other => Expected::Value(other),
        }
    }
}

impl fmt::Display for Expected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expected::Value(v) => write!(f, "{v}"),
            Expected::Error(text) => write!(f, "error containing {text:?}"),
            Expected::Undefined => f.write_str("undefined"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{note}: {message}")]
pub struct TestFailure {
    pub note: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestCase {
    pub note: String,
    /// Rule to read. Empty means [`DEFAULT_TARGET`].
    pub target: String,
    pub rules: Vec<String>,
    pub expected: Expected,
}

impl TestCase {
    pub fn new(note: impl Into<String>, expected: Expected) -> Self {
        Self {
            note: note.into(),
            target: String::new(),
            rules: Vec::new(),
            expected,
        }
    }

    #[must_use]
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    #[must_use]
    pub fn rule(mut self, rule: impl Into<String>) -> Self {
        self.rules.push(rule.into());
        self
    }

    #[must_use]
    pub fn rules<I, S>(mut self, rules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.rules.extend(rules.into_iter().map(Into::into));
        self
    }

    fn target_name(&self) -> &str {
        if self.target.is_empty() {
            DEFAULT_TARGET
        } else {
            &self.target
        }
    }

    /// The module text the rules compile as.
    #[must_use]
    pub fn source(&self) -> String {
        format!("package {TEST_PACKAGE}\n{}", self.rules.join(" \n\n"))
    }

    /// Compile and check the case. A panic anywhere inside becomes a failure.
    ///
    /// # Errors
    ///
    /// Returns [`TestFailure`] describing how the outcome differed from
    /// `expected`.
    pub fn run(
        &self,
        input: Option<&serde_json::Value>,
        data: Option<&serde_json::Value>,
    ) -> Result<(), TestFailure> {
        guarded(&self.note, || self.check(input, data))
    }

    fn check(&self, input: Option<&serde_json::Value>, data: Option<&serde_json::Value>) -> Result<(), String> {
        let compiled = match CompiledSet::from_source(TEST_MODULE, &self.source()) {
            Ok(compiled) => compiled,
            Err(err) => {
                return match &self.expected {
                    Expected::Error(text) if err.to_string().contains(text.as_str()) => Ok(()),
                    Expected::Error(text) => Err(format!("expected error containing {text:?} but got: {err}")),
                    _ => Err(format!("unexpected error: {err}")),
                };
            }
        };
        evaluate_and_check(&compiled, TEST_PACKAGE, self.target_name(), input, data, &self.expected)
    }
}

/// Run every case, collecting the failures.
#[must_use]
pub fn run_all(
    cases: &[TestCase],
    input: Option<&serde_json::Value>,
    data: Option<&serde_json::Value>,
) -> Vec<TestFailure> {
    cases
        .iter()
        .filter_map(|case| case.run(input, data).err())
        .collect()
}

/// Check one rule of a complete module, read under the module's own package.
///
/// # Errors
///
/// Returns [`TestFailure`] if the source does not compile (and no error is
/// expected) or the outcome differs from `expected`.
pub fn run_source(
    source: &str,
    rule: &str,
    input: Option<&serde_json::Value>,
    data: Option<&serde_json::Value>,
    expected: &Expected,
) -> Result<(), TestFailure> {
    guarded(rule, || check_source(source, rule, input, data, expected))
}

fn check_source(
    source: &str,
    rule: &str,
    input: Option<&serde_json::Value>,
    data: Option<&serde_json::Value>,
    expected: &Expected,
) -> Result<(), String> {
    let compiled = match CompiledSet::from_source(TEST_MODULE, source) {
        Ok(compiled) => compiled,
        Err(err) => {
            return match expected {
                Expected::Error(text) if err.to_string().contains(text.as_str()) => Ok(()),
                _ => Err(format!("unexpected error: {err}")),
            };
        }
    };
    let package = compiled
        .module(TEST_MODULE)
        .map(|m| m.package_name())
        .unwrap_or_default();
    evaluate_and_check(&compiled, &package, rule, input, data, expected)
}

/// Run `check`, turning a panic anywhere inside it into a failure.
fn guarded(note: &str, check: impl FnOnce() -> Result<(), String>) -> Result<(), TestFailure> {
    let outcome = catch_unwind(AssertUnwindSafe(check));
    let result = outcome.unwrap_or_else(|payload| Err(format!("panic: {}", panic_message(&*payload))));
    result.map_err(|message| {
        debug!(%note, %message, "test case failed");
        TestFailure {
            note: note.to_owned(),
            message,
        }
    })
}

fn evaluate_and_check(
    compiled: &CompiledSet,
    package: &str,
    rule: &str,
    input: Option<&serde_json::Value>,
    data: Option<&serde_json::Value>,
    expected: &Expected,
) -> Result<(), String> {
    let input = input.cloned().map(Value::from);
    let store = data.cloned().map(Store::from);
    let outcome = query_rule(compiled, package, rule, input.as_ref(), store.as_ref());
    check_outcome(outcome, expected)
}

fn check_outcome(outcome: Result<RuleValue, QueryError>, expected: &Expected) -> Result<(), String> {
    match (expected, outcome) {
        (Expected::Error(_), Ok(actual)) => Err(format!("expected error but got: {}", actual.value)),
        (Expected::Error(text), Err(QueryError::Eval(err))) => {
            if err.to_string().contains(text.as_str()) {
                Ok(())
            } else {
                Err(format!("expected error containing {text:?} but got: {err}"))
            }
        }
        (Expected::Error(_), Err(QueryError::Undefined(_))) => Err("expected error but got undefined".to_owned()),
        (Expected::Error(_), Err(err)) => Err(format!("expected error but got: {err}")),
        (Expected::Undefined, Err(QueryError::Undefined(_))) => Ok(()),
        (Expected::Undefined, Ok(actual)) => Err(format!("expected undefined but got {}", actual.value)),
        (Expected::Value(want), Err(QueryError::Undefined(_))) => {
            Err(format!("expected {want} but got undefined"))
        }
        (Expected::Value(_), Err(QueryError::Ambiguous(err))) if err.kind == Ambiguity::NoValues => {
            Err("no expressions found upon evaluation".to_owned())
        }
        (_, Err(err)) => Err(format!("unexpected error: {err}")),
        (Expected::Value(want), Ok(actual)) => match equal(want, &actual.value) {
            Ok(true) => Ok(()),
            Ok(false) => Err(format!("expected {want} but got {}", actual.value)),
            Err(err) => Err(err.to_string()),
        },
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_owned()
    }
}
