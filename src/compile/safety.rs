//! Safety checking and body reordering.
//!
//! Every variable must be bound before an expression reads it. Expressions
//! are scheduled greedily in source order: the first one whose inputs are
//! all bound runs next and its outputs join the bound set.

use std::collections::BTreeSet;

use crate::ast::{DATA_ROOT, Expr, ExprKind, INPUT_ROOT, Location, Rule, Term, TermKind, WILDCARD};
use crate::types::{CompileError, CompileErrorKind};

use super::rewrite::WILDCARD_PREFIX;

type Vars = BTreeSet<String>;

/// Variables bound before any expression runs.
pub(crate) fn root_vars() -> Vars {
    [DATA_ROOT, INPUT_ROOT].into_iter().map(String::from).collect()
}

/// Reorder a rule body and check its head.
pub(crate) fn check_rule(rule: &mut Rule, errors: &mut Vec<CompileError>) {
    let mut bound = root_vars();
    reorder(&mut rule.body, &mut bound, errors);
    let location = rule.location.clone();
    for term in [rule.head.key.as_mut(), rule.head.value.as_mut()].into_iter().flatten() {
        check_term(term, &bound, location.as_ref(), errors);
    }
}

/// Schedule `body` against `bound`, extending `bound` with every output.
/// Expressions that can never be scheduled are reported and appended in
/// their original order.
pub(crate) fn reorder(body: &mut Vec<Expr>, bound: &mut Vars, errors: &mut Vec<CompileError>) {
    let mut outer = bound.clone();
    for expr in body.iter() {
        outer.extend(outputs(expr));
    }

    let mut pending: Vec<Expr> = std::mem::take(body);
    while !pending.is_empty() {
        let Some(next) = pending.iter().position(|e| missing(e, bound, &outer).is_empty()) else {
            break;
        };
        let mut expr = pending.remove(next);
        nested_bodies(&mut expr, bound, errors);
        bound.extend(outputs(&expr));
        body.push(expr);
    }

    let mut reported = Vars::new();
    for expr in &pending {
        for var in missing(expr, bound, &outer) {
            if reported.insert(var.clone()) {
                errors.push(unsafe_var(&var, expr.location.as_ref()));
            }
        }
    }
    body.append(&mut pending);
}

fn unsafe_var(var: &str, location: Option<&Location>) -> CompileError {
    let var = if var.starts_with(WILDCARD_PREFIX) { WILDCARD } else { var };
    CompileError::new(CompileErrorKind::UnsafeVar { var: var.to_owned() }, location)
}

/// A term outside any body, such as a rule head or a comprehension's output.
fn check_term(term: &mut Term, bound: &Vars, location: Option<&Location>, errors: &mut Vec<CompileError>) {
    let usage = as_value(term, bound);
    for var in usage.inputs.difference(bound) {
        if !usage.gens.contains(var) {
            errors.push(unsafe_var(var, term.location.as_ref().or(location)));
        }
    }
    nested_in_term(term, bound, errors);
}

/// Reorder the bodies of comprehensions nested in `expr` now that the
/// variables bound ahead of it are known.
fn nested_bodies(expr: &mut Expr, bound: &Vars, errors: &mut Vec<CompileError>) {
    match &mut expr.kind {
        ExprKind::Term(t) => nested_in_term(t, bound, errors),
        ExprKind::Unify(a, b) | ExprKind::Assign(a, b) => {
            nested_in_term(a, bound, errors);
            nested_in_term(b, bound, errors);
        }
        ExprKind::Compare { lhs, rhs, .. } => {
            nested_in_term(lhs, bound, errors);
            nested_in_term(rhs, bound, errors);
        }
        ExprKind::Not(inner) => nested_bodies(inner, bound, errors),
        ExprKind::Some(_) => {}
    }
}

fn nested_in_term(term: &mut Term, bound: &Vars, errors: &mut Vec<CompileError>) {
    for_each_comprehension(term, &mut |comprehension| {
        comprehension_body(comprehension, bound, errors);
    });
}

fn comprehension_body(term: &mut Term, bound: &Vars, errors: &mut Vec<CompileError>) {
    let location = term.location.clone();
    let mut inner = bound.clone();
    match &mut term.kind {
        TermKind::ArrayComprehension { term, body } | TermKind::SetComprehension { term, body } => {
            reorder(body, &mut inner, errors);
            check_term(term, &inner, location.as_ref(), errors);
        }
        TermKind::ObjectComprehension { key, value, body } => {
            reorder(body, &mut inner, errors);
            check_term(key, &inner, location.as_ref(), errors);
            check_term(value, &inner, location.as_ref(), errors);
        }
        _ => {}
    }
}

/// Calls `f` on every comprehension in `term`, without descending into
/// comprehension bodies.
fn for_each_comprehension(term: &mut Term, f: &mut impl FnMut(&mut Term)) {
    match &mut term.kind {
        TermKind::ArrayComprehension { .. }
        | TermKind::SetComprehension { .. }
        | TermKind::ObjectComprehension { .. } => f(term),
        TermKind::Ref(items) | TermKind::Array(items) | TermKind::Set(items) => {
            for item in items {
                for_each_comprehension(item, f);
            }
        }
        TermKind::Call { args, .. } => {
            for arg in args {
                for_each_comprehension(arg, f);
            }
        }
        TermKind::Object(pairs) => {
            for (key, value) in pairs {
                for_each_comprehension(key, f);
                for_each_comprehension(value, f);
            }
        }
        TermKind::Null
        | TermKind::Boolean(_)
        | TermKind::Number(_)
        | TermKind::String(_)
        | TermKind::Var(_) => {}
    }
}

/// Variables an expression needs but that are not yet bound. Empty when the
/// expression can run.
fn missing(expr: &Expr, bound: &Vars, outer: &Vars) -> Vars {
    match &expr.kind {
        ExprKind::Term(t) => unbound(as_value(t, outer), bound),
        ExprKind::Compare { lhs, rhs, .. } => {
            let mut usage = as_value(lhs, outer);
            usage.merge(as_value(rhs, outer));
            unbound(usage, bound)
        }
        ExprKind::Assign(lhs, rhs) => {
            let mut usage = as_value(rhs, outer);
            let pattern = as_pattern(lhs, outer);
            usage.inputs.extend(pattern.needed);
            usage.gens.extend(pattern.gens);
            unbound(usage, bound)
        }
        ExprKind::Unify(a, b) => {
            let (value_a, value_b) = (as_value(a, outer), as_value(b, outer));
            let (pattern_a, pattern_b) = (as_pattern(a, outer), as_pattern(b, outer));
            let gens: Vars = value_a.gens.union(&value_b.gens).cloned().collect();
            let side = |value: &Usage, pattern: &Pattern| -> Vars {
                value
                    .inputs
                    .iter()
                    .chain(&pattern.needed)
                    .filter(|v| !gens.contains(*v) && !bound.contains(*v))
                    .cloned()
                    .collect()
            };
            let a_first = side(&value_a, &pattern_b);
            if a_first.is_empty() {
                return a_first;
            }
            let b_first = side(&value_b, &pattern_a);
            if b_first.len() <= a_first.len() { b_first } else { a_first }
        }
        ExprKind::Not(inner) => missing(inner, bound, outer),
        ExprKind::Some(_) => Vars::new(),
    }
}

fn unbound(usage: Usage, bound: &Vars) -> Vars {
    usage
        .inputs
        .into_iter()
        .filter(|v| !usage.gens.contains(v) && !bound.contains(v))
        .collect()
}

/// Variables an expression binds once it has run.
fn outputs(expr: &Expr) -> Vars {
    let none = Vars::new();
    match &expr.kind {
        ExprKind::Term(t) => as_value(t, &none).gens,
        ExprKind::Compare { lhs, rhs, .. } => {
            let mut usage = as_value(lhs, &none);
            usage.merge(as_value(rhs, &none));
            usage.gens
        }
        ExprKind::Assign(lhs, rhs) => {
            let mut out = as_value(rhs, &none).gens;
            let pattern = as_pattern(lhs, &none);
            out.extend(pattern.vars);
            out.extend(pattern.gens);
            out
        }
        ExprKind::Unify(a, b) => {
            let mut out = Vars::new();
            for side in [a, b] {
                let pattern = as_pattern(side, &none);
                out.extend(pattern.vars);
                out.extend(pattern.gens);
                out.extend(as_value(side, &none).gens);
            }
            out
        }
        ExprKind::Not(_) | ExprKind::Some(_) => Vars::new(),
    }
}

/// Variable usage of a term evaluated as a value.
#[derive(Default)]
struct Usage {
    inputs: Vars,
    /// Unbound ref segments iterate over the collection and bind the key.
    gens: Vars,
}

impl Usage {
    fn merge(&mut self, other: Usage) {
        self.inputs.extend(other.inputs);
        self.gens.extend(other.gens);
    }
}

/// Variable usage of a term unified as a pattern.
#[derive(Default)]
struct Pattern {
    /// Bound by the unification.
    vars: Vars,
    /// Needed to evaluate the non-pattern parts.
    needed: Vars,
    gens: Vars,
}

/// `outer` holds every variable the enclosing body can bind; a comprehension
/// reads exactly those of its variables.
fn as_value(term: &Term, outer: &Vars) -> Usage {
    let mut usage = Usage::default();
    value_vars(term, outer, &mut usage);
    usage
}

fn value_vars(term: &Term, outer: &Vars, usage: &mut Usage) {
    match &term.kind {
        TermKind::Null | TermKind::Boolean(_) | TermKind::Number(_) | TermKind::String(_) => {}
        TermKind::Var(name) => {
            usage.inputs.insert(name.clone());
        }
        TermKind::Ref(segments) => {
            let Some((head, rest)) = segments.split_first() else {
                return;
            };
            value_vars(head, outer, usage);
            for segment in rest {
                match &segment.kind {
                    TermKind::Var(name) => {
                        usage.gens.insert(name.clone());
                    }
                    _ => value_vars(segment, outer, usage),
                }
            }
        }
        TermKind::Array(items) | TermKind::Set(items) => {
            for item in items {
                value_vars(item, outer, usage);
            }
        }
        TermKind::Call { args, .. } => {
            for arg in args {
                value_vars(arg, outer, usage);
            }
        }
        TermKind::Object(pairs) => {
            for (key, value) in pairs {
                value_vars(key, outer, usage);
                value_vars(value, outer, usage);
            }
        }
        TermKind::ArrayComprehension { .. }
        | TermKind::SetComprehension { .. }
        | TermKind::ObjectComprehension { .. } => {
            let mut all = Vars::new();
            all_vars(term, &mut all);
            usage.inputs.extend(all.into_iter().filter(|v| outer.contains(v)));
        }
    }
}

fn as_pattern(term: &Term, outer: &Vars) -> Pattern {
    let mut pattern = Pattern::default();
    pattern_vars(term, outer, &mut pattern);
    pattern
}

fn pattern_vars(term: &Term, outer: &Vars, pattern: &mut Pattern) {
    match &term.kind {
        TermKind::Var(name) => {
            pattern.vars.insert(name.clone());
        }
        TermKind::Array(items) => {
            for item in items {
                pattern_vars(item, outer, pattern);
            }
        }
        TermKind::Object(pairs) => {
            for (key, value) in pairs {
                let usage = as_value(key, outer);
                pattern.needed.extend(usage.inputs);
                pattern.gens.extend(usage.gens);
                pattern_vars(value, outer, pattern);
            }
        }
        _ => {
            let usage = as_value(term, outer);
            pattern.needed.extend(usage.inputs);
            pattern.gens.extend(usage.gens);
        }
    }
}

fn all_vars(term: &Term, out: &mut Vars) {
    use crate::ast::visit::{Visitor, walk_term};

    struct Collect<'a>(&'a mut Vars);

    impl Visitor for Collect<'_> {
        fn visit_term(&mut self, term: &Term) {
            if let TermKind::Var(name) = &term.kind {
                self.0.insert(name.clone());
            }
            walk_term(self, term);
        }
    }

    Collect(out).visit_term(term);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_module;

    fn check(source: &str) -> (Rule, Vec<CompileError>) {
        let module = parse_module("m.rego", source).unwrap();
        let mut rule = module.rules[0].clone();
        let mut errors = Vec::new();
        check_rule(&mut rule, &mut errors);
        (rule, errors)
    }

    fn body_text(rule: &Rule) -> Vec<String> {
        rule.body.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn safe_body_keeps_order() {
        let (rule, errors) = check("package p\nr { x := input.a; x > 1 }\n");
        assert!(errors.is_empty());
        assert_eq!(body_text(&rule), vec!["x := input.a", "x > 1"]);
    }

    #[test]
    fn consumers_move_after_producers() {
        let (rule, errors) = check("package p\nr { y > 1; y = x + 1; x = input.a }\n");
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(body_text(&rule), vec!["x = input.a", "y = x + 1", "y > 1"]);
    }

    #[test]
    fn generator_vars_are_outputs() {
        let (rule, errors) = check("package p\nr[v] { v == 2; v = input.xs[i] }\n");
        assert!(errors.is_empty());
        assert_eq!(body_text(&rule), vec!["v = input.xs[i]", "v == 2"]);
    }

    #[test]
    fn unbound_variable_is_unsafe() {
        let (_, errors) = check("package p\nr { x > 1 }\n");
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].kind, CompileErrorKind::UnsafeVar { var: "x".into() });
        assert_eq!(errors[0].location.as_ref().map(|l| l.row), Some(2));
    }

    #[test]
    fn unsafe_head_variable() {
        let (_, errors) = check("package p\nr = x { true }\n");
        assert_eq!(errors[0].kind, CompileErrorKind::UnsafeVar { var: "x".into() });
    }

    #[test]
    fn negation_does_not_bind() {
        let (_, errors) = check("package p\nr { not x = 1; x > 0 }\n");
        assert_eq!(errors.len(), 1);
    }

    #[test]
    fn comprehension_reads_outer_bindings() {
        let (rule, errors) = check("package p\nr = c { c := count([y | y = input.xs[_]; y > m]); m := 1 }\n");
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(rule.body[0].to_string(), "m := 1");
    }

    #[test]
    fn unify_needs_one_evaluable_side() {
        let (_, errors) = check("package p\nr { x = y }\n");
        assert!(!errors.is_empty());
    }
}
