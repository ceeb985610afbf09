use std::collections::BTreeMap;

use serde::Serialize;

use crate::ast::Location;

use super::Value;

/// Value of one query expression within a result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpressionValue {
    pub value: Value,
    /// The expression's canonical source text.
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

/// One satisfying assignment of a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// One entry per query expression, in query order. Term expressions carry
    /// their value; every other expression carries `true`.
    pub expressions: Vec<ExpressionValue>,
    /// Values of the query's own variables.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub bindings: BTreeMap<String, Value>,
}

impl QueryResult {
    /// The first expression's value.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.expressions.first().map(|e| &e.value)
    }

    #[must_use]
    pub fn binding(&self, var: &str) -> Option<&Value> {
        self.bindings.get(var)
    }
}

/// Ordered query output. Empty means the query is undefined.
pub type ResultSet = Vec<QueryResult>;
