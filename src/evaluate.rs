//! Top-down evaluation of compiled bodies.
//!
//! A body is evaluated eagerly into the list of every binding set that
//! satisfies it. Rule groups are evaluated on first reference and cached for
//! the rest of the query.

pub(crate) mod builtins;

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::trace;

use crate::ast::{CompareOp, DATA_ROOT, Expr, ExprKind, INPUT_ROOT, Location, RuleKind, Term, TermKind};
use crate::types::{CompiledSet, RuleGroup, Store, Value};

pub(crate) type Bindings = BTreeMap<String, Value>;

/// Values of a term, each with the bindings that produced it.
type Solutions = Vec<(Value, Bindings)>;

/// Evaluation failure inside a query, before it is attributed to the query
/// text.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EvalFailure {
    pub(crate) message: String,
    pub(crate) location: Option<Location>,
}

impl EvalFailure {
    fn new(message: impl Into<String>, location: Option<&Location>) -> Self {
        Self {
            message: message.into(),
            location: location.cloned(),
        }
    }
}

type Eval<T> = Result<T, EvalFailure>;

pub(crate) struct Evaluator<'a> {
    compiled: &'a CompiledSet,
    input: Option<&'a Value>,
    store: &'a Store,
    cache: RefCell<HashMap<Vec<String>, Option<Value>>>,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(compiled: &'a CompiledSet, input: Option<&'a Value>, store: &'a Store) -> Self {
        Self {
            compiled,
            input,
            store,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// Every binding set satisfying `body`, in evaluation order.
    pub(crate) fn eval_body(&self, body: &[Expr], bindings: Bindings) -> Eval<Vec<Bindings>> {
        let mut solutions = vec![bindings];
        for expr in body {
            let mut next = Vec::new();
            for bindings in solutions {
                next.extend(self.eval_expr(expr, bindings)?);
            }
            if next.is_empty() {
                return Ok(next);
            }
            solutions = next;
        }
        Ok(solutions)
    }

    fn eval_expr(&self, expr: &Expr, bindings: Bindings) -> Eval<Vec<Bindings>> {
        match &expr.kind {
            ExprKind::Term(term) => Ok(self
                .eval_term(term, &bindings)?
                .into_iter()
                .filter(|(value, _)| *value != Value::Bool(false))
                .map(|(_, b)| b)
                .collect()),
            ExprKind::Unify(a, b) | ExprKind::Assign(a, b) => self.eval_unify(a, b, &bindings),
            ExprKind::Compare { op, lhs, rhs } => {
                let mut out = Vec::new();
                for (left, b1) in self.eval_term(lhs, &bindings)? {
                    for (right, b2) in self.eval_term(rhs, &b1)? {
                        if compare(*op, &left, &right) {
                            out.push(b2);
                        }
                    }
                }
                Ok(out)
            }
            ExprKind::Not(inner) => {
                if self.eval_expr(inner, bindings.clone())?.is_empty() {
                    Ok(vec![bindings])
                } else {
                    Ok(Vec::new())
                }
            }
            ExprKind::Some(_) => Ok(vec![bindings]),
        }
    }

    fn eval_unify(&self, a: &Term, b: &Term, bindings: &Bindings) -> Eval<Vec<Bindings>> {
        let (pattern, value) = match (has_unbound(a, bindings), has_unbound(b, bindings)) {
            (true, false) => (a, b),
            (false, true) => (b, a),
            _ => (b, a),
        };
        let mut out = Vec::new();
        for (v, b1) in self.eval_term(value, bindings)? {
            out.extend(self.unify(pattern, &v, b1)?);
        }
        Ok(out)
    }

    /// Match `pattern` against a known value, binding its free variables.
    fn unify(&self, pattern: &Term, value: &Value, bindings: Bindings) -> Eval<Vec<Bindings>> {
        match (&pattern.kind, value) {
            (TermKind::Var(name), _) if is_free(name, &bindings) => {
                let mut bindings = bindings;
                bindings.insert(name.clone(), value.clone());
                Ok(vec![bindings])
            }
            (TermKind::Array(items), Value::Array(values)) if has_unbound(pattern, &bindings) => {
                if items.len() != values.len() {
                    return Ok(Vec::new());
                }
                let mut solutions = vec![bindings];
                for (item, v) in items.iter().zip(values) {
                    let mut next = Vec::new();
                    for b in solutions {
                        next.extend(self.unify(item, v, b)?);
                    }
                    solutions = next;
                }
                Ok(solutions)
            }
            (TermKind::Object(pairs), Value::Object(map)) if has_unbound(pattern, &bindings) => {
                if pairs.len() != map.len() {
                    return Ok(Vec::new());
                }
                let mut solutions = vec![bindings];
                for (key, item) in pairs {
                    let mut next = Vec::new();
                    for b in solutions {
                        for (k, b1) in self.eval_term(key, &b)? {
                            if let Some(v) = map.get(&k) {
                                next.extend(self.unify(item, v, b1)?);
                            }
                        }
                    }
                    solutions = next;
                }
                Ok(solutions)
            }
            _ => Ok(self
                .eval_term(pattern, &bindings)?
                .into_iter()
                .filter(|(v, _)| v == value)
                .map(|(_, b)| b)
                .collect()),
        }
    }

    pub(crate) fn eval_term(&self, term: &Term, bindings: &Bindings) -> Eval<Solutions> {
        let one = |value: Value| Ok(vec![(value, bindings.clone())]);
        match &term.kind {
            TermKind::Null => one(Value::Null),
            TermKind::Boolean(b) => one(Value::Bool(*b)),
            TermKind::Number(n) => one(Value::Number(*n)),
            TermKind::String(s) => one(Value::String(s.clone())),
            TermKind::Var(name) => {
                if let Some(value) = bindings.get(name) {
                    return one(value.clone());
                }
                match name.as_str() {
                    INPUT_ROOT => self.input.map_or(Ok(Vec::new()), |v| one(v.clone())),
                    DATA_ROOT => self.materialize(&[]).and_then(one),
                    _ => Ok(Vec::new()),
                }
            }
            TermKind::Ref(segments) => {
                let Some((head, rest)) = segments.split_first() else {
                    return Ok(Vec::new());
                };
                if head.as_var() == Some(DATA_ROOT) && !bindings.contains_key(DATA_ROOT) {
                    let mut out = Vec::new();
                    self.eval_data(&mut Vec::new(), rest, bindings, &mut out)?;
                    return Ok(out);
                }
                let mut out = Vec::new();
                for (value, b) in self.eval_term(head, bindings)? {
                    self.walk(&value, rest, b, &mut out)?;
                }
                Ok(out)
            }
            TermKind::Array(items) => Ok(self
                .product(items, bindings)?
                .into_iter()
                .map(|(values, b)| (Value::Array(values), b))
                .collect()),
            TermKind::Set(items) => Ok(self
                .product(items, bindings)?
                .into_iter()
                .map(|(values, b)| (Value::Set(values.into_iter().collect()), b))
                .collect()),
            TermKind::Object(pairs) => {
                let flat: Vec<Term> = pairs
                    .iter()
                    .flat_map(|(k, v)| [k.clone(), v.clone()])
                    .collect();
                Ok(self
                    .product(&flat, bindings)?
                    .into_iter()
                    .map(|(values, b)| {
                        let mut map = BTreeMap::new();
                        let mut values = values.into_iter();
                        while let (Some(k), Some(v)) = (values.next(), values.next()) {
                            map.insert(k, v);
                        }
                        (Value::Object(map), b)
                    })
                    .collect())
            }
            TermKind::Call { operator, args } => {
                let Some(builtin) = builtins::lookup(operator) else {
                    return Err(EvalFailure::new(
                        format!("undefined function {operator}"),
                        term.location.as_ref(),
                    ));
                };
                let mut out = Vec::new();
                for (values, b) in self.product(args, bindings)? {
                    let result = (builtin.func)(&values).map_err(|message| {
                        EvalFailure::new(format!("{operator}: {message}"), term.location.as_ref())
                    })?;
                    if let Some(value) = result {
                        out.push((value, b));
                    }
                }
                Ok(out)
            }
            TermKind::ArrayComprehension { term: head, body } => {
                let mut items = Vec::new();
                for b in self.eval_body(body, bindings.clone())? {
                    items.extend(self.eval_term(head, &b)?.into_iter().map(|(v, _)| v));
                }
                one(Value::Array(items))
            }
            TermKind::SetComprehension { term: head, body } => {
                let mut items = BTreeSet::new();
                for b in self.eval_body(body, bindings.clone())? {
                    items.extend(self.eval_term(head, &b)?.into_iter().map(|(v, _)| v));
                }
                one(Value::Set(items))
            }
            TermKind::ObjectComprehension { key, value, body } => {
                let mut map = BTreeMap::new();
                for b in self.eval_body(body, bindings.clone())? {
                    for (k, b1) in self.eval_term(key, &b)? {
                        for (v, _) in self.eval_term(value, &b1)? {
                            insert_unique(&mut map, k.clone(), v, term.location.as_ref())?;
                        }
                    }
                }
                one(Value::Object(map))
            }
        }
    }

    /// Cartesian product of the values of `items`, left to right.
    fn product(&self, items: &[Term], bindings: &Bindings) -> Eval<Vec<(Vec<Value>, Bindings)>> {
        let mut partial = vec![(Vec::with_capacity(items.len()), bindings.clone())];
        for item in items {
            let mut next = Vec::new();
            for (values, b) in partial {
                for (value, b1) in self.eval_term(item, &b)? {
                    let mut values = values.clone();
                    values.push(value);
                    next.push((values, b1));
                }
            }
            partial = next;
        }
        Ok(partial)
    }

    /// Follow `path` into `value`. Free variables in the path iterate over
    /// the collection at that point.
    fn walk(&self, value: &Value, path: &[Term], bindings: Bindings, out: &mut Solutions) -> Eval<()> {
        let Some((segment, rest)) = path.split_first() else {
            out.push((value.clone(), bindings));
            return Ok(());
        };
        if let Some(name) = segment.as_var().filter(|n| is_free(n, &bindings)) {
            for (key, child) in children(value) {
                let mut b = bindings.clone();
                b.insert(name.to_owned(), key);
                self.walk(child, rest, b, out)?;
            }
            return Ok(());
        }
        for (key, b) in self.eval_term(segment, &bindings)? {
            if let Some(child) = value.get(&key) {
                self.walk(child, rest, b, out)?;
            }
        }
        Ok(())
    }

    /// Resolve a `data` path, merging rule output with the base document.
    fn eval_data(
        &self,
        prefix: &mut Vec<String>,
        path: &[Term],
        bindings: &Bindings,
        out: &mut Solutions,
    ) -> Eval<()> {
        if self.compiled.groups.contains_key(prefix.as_slice()) {
            if let Some(value) = self.eval_group(prefix.as_slice())? {
                self.walk(&value, path, bindings.clone(), out)?;
            }
            return Ok(());
        }
        if !self.compiled.has_rules_under(prefix.as_slice()) {
            if let Some(value) = self.store.read(prefix.as_slice()) {
                self.walk(value, path, bindings.clone(), out)?;
            }
            return Ok(());
        }
        let Some(segment) = path.first() else {
            let value = self.materialize(prefix.as_slice())?;
            out.push((value, bindings.clone()));
            return Ok(());
        };
        if segment.as_var().is_some_and(|n| is_free(n, bindings)) {
            let value = self.materialize(prefix.as_slice())?;
            return self.walk(&value, path, bindings.clone(), out);
        }
        for (key, b) in self.eval_term(segment, bindings)? {
            if let Value::String(key) = key {
                prefix.push(key);
                let result = self.eval_data(prefix, &path[1..], &b, out);
                prefix.pop();
                result?;
            }
        }
        Ok(())
    }

    /// The full document at a `data` prefix: the base document overlaid with
    /// every rule below it.
    fn materialize(&self, prefix: &[String]) -> Eval<Value> {
        let mut map = match self.store.read(prefix) {
            Some(Value::Object(map)) => map.clone(),
            _ => BTreeMap::new(),
        };
        let mut path = prefix.to_vec();
        for child in self.compiled.children(prefix) {
            path.push(child.to_owned());
            let value = if self.compiled.groups.contains_key(path.as_slice()) {
                self.eval_group(&path)?
            } else {
                Some(self.materialize(&path)?)
            };
            path.pop();
            if let Some(value) = value {
                map.insert(Value::from(child), value);
            }
        }
        Ok(Value::Object(map))
    }

    fn eval_group(&self, path: &[String]) -> Eval<Option<Value>> {
        if let Some(cached) = self.cache.borrow().get(path) {
            return Ok(cached.clone());
        }
        let Some(group) = self.compiled.groups.get(path) else {
            return Ok(None);
        };
        trace!(rule = %path.join("."), rules = group.rules.len(), "evaluating rule group");
        let value = match group.kind {
            RuleKind::Complete => self.eval_complete(group)?,
            RuleKind::PartialSet => Some(self.eval_partial_set(group)?),
            RuleKind::PartialObject => Some(self.eval_partial_object(group)?),
        };
        self.cache.borrow_mut().insert(path.to_vec(), value.clone());
        Ok(value)
    }

    fn eval_complete(&self, group: &RuleGroup) -> Eval<Option<Value>> {
        let mut result: Option<Value> = None;
        for rule in &group.rules {
            let head = rule.head.value.clone().unwrap_or_else(|| Term::boolean(true));
            for b in self.eval_body(&rule.body, Bindings::new())? {
                for (value, _) in self.eval_term(&head, &b)? {
                    match &result {
                        Some(existing) if *existing != value => {
                            return Err(EvalFailure::new(
                                "complete rules must not produce multiple outputs",
                                rule.location.as_ref(),
                            ));
                        }
                        Some(_) => {}
                        None => result = Some(value),
                    }
                }
            }
        }
        if result.is_some() {
            return Ok(result);
        }
        match &group.default {
            Some(default) => Ok(self
                .eval_term(default, &Bindings::new())?
                .into_iter()
                .next()
                .map(|(v, _)| v)),
            None => Ok(None),
        }
    }

    fn eval_partial_set(&self, group: &RuleGroup) -> Eval<Value> {
        let mut members = BTreeSet::new();
        for rule in &group.rules {
            let Some(key) = &rule.head.key else { continue };
            for b in self.eval_body(&rule.body, Bindings::new())? {
                members.extend(self.eval_term(key, &b)?.into_iter().map(|(v, _)| v));
            }
        }
        Ok(Value::Set(members))
    }

    fn eval_partial_object(&self, group: &RuleGroup) -> Eval<Value> {
        let mut map = BTreeMap::new();
        for rule in &group.rules {
            let (Some(key), Some(value)) = (&rule.head.key, &rule.head.value) else {
                continue;
            };
            for b in self.eval_body(&rule.body, Bindings::new())? {
                for (k, b1) in self.eval_term(key, &b)? {
                    for (v, _) in self.eval_term(value, &b1)? {
                        insert_unique(&mut map, k.clone(), v, rule.location.as_ref())?;
                    }
                }
            }
        }
        Ok(Value::Object(map))
    }
}

fn insert_unique(
    map: &mut BTreeMap<Value, Value>,
    key: Value,
    value: Value,
    location: Option<&Location>,
) -> Eval<()> {
    match map.get(&key) {
        Some(existing) if *existing != value => {
            Err(EvalFailure::new("object keys must be unique", location))
        }
        Some(_) => Ok(()),
        None => {
            map.insert(key, value);
            Ok(())
        }
    }
}

/// Key/child pairs of a collection. A set member is its own key.
fn children(value: &Value) -> Vec<(Value, &Value)> {
    match value {
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (Value::from(i64::try_from(i).unwrap_or(i64::MAX)), v))
            .collect(),
        Value::Object(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        Value::Set(items) => items.iter().map(|v| (v.clone(), v)).collect(),
        _ => Vec::new(),
    }
}

fn is_free(name: &str, bindings: &Bindings) -> bool {
    name != INPUT_ROOT && name != DATA_ROOT && !bindings.contains_key(name)
}

/// True if `term` has a free variable in a position unification can bind.
fn has_unbound(term: &Term, bindings: &Bindings) -> bool {
    match &term.kind {
        TermKind::Var(name) => is_free(name, bindings),
        TermKind::Array(items) => items.iter().any(|t| has_unbound(t, bindings)),
        TermKind::Object(pairs) => pairs.iter().any(|(_, v)| has_unbound(v, bindings)),
        _ => false,
    }
}

fn compare(op: CompareOp, left: &Value, right: &Value) -> bool {
    match op {
        CompareOp::Eq => left == right,
        CompareOp::Neq => left != right,
        CompareOp::Gt => left > right,
        CompareOp::Gte => left >= right,
        CompareOp::Lt => left < right,
        CompareOp::Lte => left <= right,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::compile::compile_query;
    use crate::parse::parse_query;

    fn eval(source: &str, query: &str, input: Option<serde_json::Value>, data: serde_json::Value) -> Eval<Vec<Value>> {
        let compiled = CompiledSet::from_source("m.rego", source).unwrap();
        let input = input.map(Value::from);
        let store = Store::from(data);
        let evaluator = Evaluator::new(&compiled, input.as_ref(), &store);
        let query = compile_query(parse_query(query).unwrap()).unwrap();
        let capture = query.outputs[0].capture.clone().unwrap();
        Ok(evaluator
            .eval_body(&query.body, Bindings::new())?
            .into_iter()
            .filter_map(|b| b.get(&capture).cloned())
            .collect())
    }

    fn values(source: &str, query: &str) -> Vec<Value> {
        eval(source, query, None, json!({})).unwrap()
    }

    #[test]
    fn complete_rule_value() {
        assert_eq!(values("package p\nr = 3 { true }\n", "data.p.r"), vec![Value::from(3_i64)]);
    }

    #[test]
    fn false_body_is_undefined() {
        assert!(values("package p\nr { false }\n", "data.p.r").is_empty());
    }

    #[test]
    fn default_applies_when_no_body_holds() {
        let source = "package p\ndefault r = 8\nr = 10 { input.x }\n";
        assert_eq!(values(source, "data.p.r"), vec![Value::from(8_i64)]);
        let with_input = eval(source, "data.p.r", Some(json!({"x": true})), json!({})).unwrap();
        assert_eq!(with_input, vec![Value::from(10_i64)]);
    }

    #[test]
    fn partial_set_collects_members() {
        let source = "package p\nlst = [1, 2, 3]\neval[v] { v = lst[_] }\n";
        let expected = Value::Set([1_i64, 2, 3].into_iter().map(Value::from).collect());
        assert_eq!(values(source, "data.p.eval"), vec![expected]);
    }

    #[test]
    fn partial_object_conflict_is_an_error() {
        let source = "package p\nobj[k] = 1 { k := \"a\" }\nobj[k] = 2 { k := \"a\" }\n";
        let err = eval(source, "data.p.obj", None, json!({})).unwrap_err();
        assert_eq!(err.message, "object keys must be unique");
    }

    #[test]
    fn complete_rule_conflict_is_an_error() {
        let source = "package p\nr = x { x := input.xs[_] }\n";
        let err = eval(source, "data.p.r", Some(json!({"xs": [1, 2]})), json!({})).unwrap_err();
        assert_eq!(err.message, "complete rules must not produce multiple outputs");
    }

    #[test]
    fn base_and_virtual_documents_merge() {
        let source = "package p\nr = 1\n";
        let got = eval(source, "data.p", None, json!({"p": {"base": true}, "q": 2})).unwrap();
        assert_eq!(got, vec![Value::from(json!({"base": true, "r": 1}))]);
        let base = eval(source, "data.q", None, json!({"q": 2})).unwrap();
        assert_eq!(base, vec![Value::from(2_i64)]);
    }

    #[test]
    fn iteration_over_input() {
        let source = "package p\ndoubled = [y | y := input.xs[_] * 2]\n";
        let got = eval(source, "data.p.doubled", Some(json!({"xs": [1, 2]})), json!({})).unwrap();
        assert_eq!(got, vec![Value::from(json!([2, 4]))]);
    }

    #[test]
    fn missing_input_is_undefined() {
        assert!(values("package p\nr = input.a\n", "data.p.r").is_empty());
    }

    #[test]
    fn builtin_error_names_the_function() {
        let err = eval("package p\nr { http.send({}) }\n", "data.p.r", None, json!({})).unwrap_err();
        assert!(err.message.starts_with("http.send: "), "{}", err.message);
    }

    #[test]
    fn negation() {
        let source = "package p\nr { not input.deny }\n";
        assert_eq!(values(source, "data.p.r"), vec![Value::Bool(true)]);
        let denied = eval(source, "data.p.r", Some(json!({"deny": true})), json!({})).unwrap();
        assert!(denied.is_empty());
    }
}
