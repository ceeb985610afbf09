//! Query execution and outcome classification.
//!
//! [`query`] runs ad-hoc query text and returns every result. [`query_rule`]
//! reads a single rule and classifies the outcome as a value, undefined, or
//! an evaluation error.

use std::fmt;

use thiserror::Error;
use tracing::{Level, debug, instrument};

use crate::ast::{DATA_ROOT, Term};
use crate::compile::compile_query;
use crate::evaluate::{Bindings, Evaluator};
use crate::parse::parse_query;
use crate::types::{CompiledSet, ExpressionValue, QueryResult, ResultSet, Store, Value};

/// A query failed to parse, compile or evaluate.
///
/// Displayed as `<query>: <message>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{query}: {message}")]
pub struct EvalError {
    pub query: String,
    pub message: String,
}

impl EvalError {
    fn new(query: &str, message: impl fmt::Display) -> Self {
        Self {
            query: query.to_owned(),
            message: message.to_string(),
        }
    }
}

/// The rule produced no value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{rule}: query undefined")]
pub struct UndefinedError {
    pub rule: String,
}

/// How a rule read departed from exactly one result with one expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ambiguity {
    MultipleResults,
    NoValues,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct AmbiguityError {
    pub rule: String,
    pub kind: Ambiguity,
}

impl fmt::Display for AmbiguityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            Ambiguity::MultipleResults => write!(f, "{}: multiple results produced", self.rule),
            Ambiguity::NoValues => write!(f, "{}: no values produced by this rule", self.rule),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Undefined(#[from] UndefinedError),
    #[error(transparent)]
    Ambiguous(#[from] AmbiguityError),
}

impl QueryError {
    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, QueryError::Undefined(_))
    }

    #[must_use]
    pub fn is_eval_error(&self) -> bool {
        matches!(self, QueryError::Eval(_))
    }
}

/// The value of a rule read.
///
/// When the query produced more than one result, `value` holds the first and
/// `ambiguity` says so. Use [`RuleValue::strict`] to treat that as an error.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleValue {
    pub value: Value,
    pub ambiguity: Option<AmbiguityError>,
}

impl RuleValue {
    /// The value, unless the read was ambiguous.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::Ambiguous`] if the read produced more than one
    /// result.
    pub fn strict(self) -> Result<Value, QueryError> {
        match self.ambiguity {
            Some(err) => Err(err.into()),
            None => Ok(self.value),
        }
    }
}

/// Run `text` against `compiled`.
///
/// An empty result set means the query is undefined. `store` backs `data`;
/// an absent store is an empty document.
///
/// # Errors
///
/// Returns [`EvalError`] if the query fails to parse, compile or evaluate.
#[instrument(level = Level::TRACE, skip(compiled, input, store))]
pub fn query(
    compiled: &CompiledSet,
    text: &str,
    input: Option<&Value>,
    store: Option<&Store>,
) -> Result<ResultSet, EvalError> {
    let exprs = parse_query(text).map_err(|e| EvalError::new(text, e))?;
    let compiled_query = compile_query(exprs).map_err(|e| EvalError::new(text, e))?;

    let empty = Store::new();
    let evaluator = Evaluator::new(compiled, input, store.unwrap_or(&empty));
    let solutions = evaluator
        .eval_body(&compiled_query.body, Bindings::new())
        .map_err(|failure| {
            debug!(query = text, error = %failure.message, "evaluation failed");
            EvalError::new(text, failure.message)
        })?;

    let results: ResultSet = solutions
        .into_iter()
        .map(|bindings| {
            let expressions = compiled_query
                .outputs
                .iter()
                .map(|output| ExpressionValue {
                    value: output
                        .capture
                        .as_ref()
                        .and_then(|var| bindings.get(var).cloned())
                        .unwrap_or(Value::Bool(true)),
                    text: output.text.clone(),
                    location: output.location.clone(),
                })
                .collect();
            let bindings = bindings
                .into_iter()
                .filter(|(name, _)| !name.starts_with('$'))
                .collect();
            QueryResult {
                expressions,
                bindings,
            }
        })
        .collect();
    debug!(query = text, results = results.len(), "query evaluated");
    Ok(results)
}

/// The `data` path of `rule` in `package`, e.g. `data.a.b.allow`.
#[must_use]
pub fn rule_path(package: &str, rule: &str) -> String {
    let mut fields: Vec<String> = package
        .split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect();
    fields.push(rule.to_owned());
    Term::path(DATA_ROOT, &fields).to_string()
}

/// Read `data.<package>.<rule>` and classify the outcome.
///
/// # Errors
///
/// Returns [`QueryError::Undefined`] if the rule has no value,
/// [`QueryError::Ambiguous`] if a result carries no expression value, and
/// [`QueryError::Eval`] for any evaluation failure.
#[instrument(level = Level::TRACE, skip(compiled, input, store))]
pub fn query_rule(
    compiled: &CompiledSet,
    package: &str,
    rule: &str,
    input: Option<&Value>,
    store: Option<&Store>,
) -> Result<RuleValue, QueryError> {
    let path = rule_path(package, rule);
    let results = query(compiled, &path, input, store)?;

    let Some(first) = results.first() else {
        debug!(rule = %path, "rule undefined");
        return Err(UndefinedError { rule: path }.into());
    };
    let Some(value) = first.value() else {
        return Err(AmbiguityError {
            rule: path,
            kind: Ambiguity::NoValues,
        }
        .into());
    };
    let ambiguity = (results.len() > 1).then(|| AmbiguityError {
        rule: path.clone(),
        kind: Ambiguity::MultipleResults,
    });
    Ok(RuleValue {
        value: value.clone(),
        ambiguity,
    })
}

/// Builder for queries against one compiled set.
///
/// ```
/// use regolith::{CompiledSet, Query, Value};
///
/// let compiled = CompiledSet::from_source("m.rego", "package p\nsum = x { x := input.a + input.b }").unwrap();
/// let input = Value::from(serde_json::json!({"a": 1, "b": 2}));
/// let value = Query::new(&compiled).input(&input).rule("p", "sum").unwrap();
/// assert_eq!(value.value, Value::from(3_i64));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Query<'a> {
    compiled: &'a CompiledSet,
    input: Option<&'a Value>,
    store: Option<&'a Store>,
}

impl<'a> Query<'a> {
    #[must_use]
    pub fn new(compiled: &'a CompiledSet) -> Self {
        Self {
            compiled,
            input: None,
            store: None,
        }
    }

    #[must_use]
    pub fn input(mut self, input: &'a Value) -> Self {
        self.input = Some(input);
        self
    }

    #[must_use]
    pub fn store(mut self, store: &'a Store) -> Self {
        self.store = Some(store);
        self
    }

    /// # Errors
    ///
    /// See [`query`].
    pub fn run(&self, text: &str) -> Result<ResultSet, EvalError> {
        query(self.compiled, text, self.input, self.store)
    }

    /// # Errors
    ///
    /// See [`query_rule`].
    pub fn rule(&self, package: &str, rule: &str) -> Result<RuleValue, QueryError> {
        query_rule(self.compiled, package, rule, self.input, self.store)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn compiled(source: &str) -> CompiledSet {
        CompiledSet::from_source("m.rego", source).unwrap()
    }

    #[test]
    fn rule_paths_quote_odd_names() {
        assert_eq!(rule_path("a.b", "allow"), "data.a.b.allow");
        assert_eq!(rule_path("testing", "my-rule"), "data.testing[\"my-rule\"]");
    }

    #[test]
    fn expression_values_and_bindings() {
        let compiled = compiled("package p\nr = 3\n");
        let results = query(&compiled, "x := data.p.r; x > 1; data.p.r", None, None).unwrap();
        assert_eq!(results.len(), 1);
        let result = &results[0];
        let values: Vec<&Value> = result.expressions.iter().map(|e| &e.value).collect();
        assert_eq!(values, vec![&Value::Bool(true), &Value::Bool(true), &Value::from(3_i64)]);
        assert_eq!(result.expressions[2].text, "data.p.r");
        assert_eq!(result.binding("x"), Some(&Value::from(3_i64)));
        assert_eq!(result.bindings.len(), 1);
    }

    #[test]
    fn false_term_is_captured() {
        let compiled = compiled("package p\ndefault r = false\n");
        let results = query(&compiled, "data.p.r", None, None).unwrap();
        assert_eq!(results[0].value(), Some(&Value::Bool(false)));
    }

    #[test]
    fn every_solution_is_a_result() {
        let compiled = compiled("package p\n");
        let input = Value::from(json!({"xs": [1, 2, 3]}));
        let results = query(&compiled, "x := input.xs[_]", Some(&input), None).unwrap();
        assert_eq!(results.len(), 3);
    }

    #[test]
    fn parse_errors_carry_the_query() {
        let compiled = compiled("package p\n");
        let err = query(&compiled, "x := ", None, None).unwrap_err();
        assert_eq!(err.query, "x := ");
        assert!(err.to_string().starts_with("x := : parse error"));
    }

    #[test]
    fn undefined_and_eval_errors_are_distinct() {
        let compiled = compiled("package p\nu { false }\ne { http.send({}) }\n");
        let undefined = query_rule(&compiled, "p", "u", None, None).unwrap_err();
        assert!(undefined.is_undefined());
        assert!(!undefined.is_eval_error());
        assert_eq!(undefined.to_string(), "data.p.u: query undefined");

        let eval = query_rule(&compiled, "p", "e", None, None).unwrap_err();
        assert!(eval.is_eval_error());
        assert!(!eval.is_undefined());
    }

    #[test]
    fn store_backs_data() {
        let compiled = compiled("package p\nr = x { x := data.a + data.b }\n");
        let store = Store::from(json!({"a": 1, "b": 2}));
        let value = Query::new(&compiled).store(&store).rule("p", "r").unwrap();
        assert_eq!(value.strict().unwrap(), Value::from(3_i64));
    }

    #[test]
    fn strict_rejects_ambiguity() {
        let value = RuleValue {
            value: Value::Null,
            ambiguity: Some(AmbiguityError {
                rule: "data.p.r".into(),
                kind: Ambiguity::MultipleResults,
            }),
        };
        let err = value.strict().unwrap_err();
        assert_eq!(err.to_string(), "data.p.r: multiple results produced");
        assert!(!err.is_undefined() && !err.is_eval_error());
    }
}
