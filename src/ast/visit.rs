//! Exhaustive traversal over the AST.
//!
//! Each `walk_*` function matches every node variant, so adding a variant
//! without handling it here is a compile error. Implementors override the
//! `visit_*` hooks they care about and call the matching `walk_*` to recurse.

use super::{Expr, ExprKind, Location, Module, Rule, Term, TermKind};

/// Read-only visitor.
pub trait Visitor {
    fn visit_module(&mut self, module: &Module) {
        walk_module(self, module);
    }

    fn visit_rule(&mut self, rule: &Rule) {
        walk_rule(self, rule);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }

    fn visit_term(&mut self, term: &Term) {
        walk_term(self, term);
    }

    fn visit_location(&mut self, _location: Option<&Location>) {}
}

pub fn walk_module<V: Visitor + ?Sized>(v: &mut V, module: &Module) {
    v.visit_location(module.package.location.as_ref());
    for import in &module.imports {
        v.visit_location(import.location.as_ref());
    }
    for rule in &module.rules {
        v.visit_rule(rule);
    }
}

pub fn walk_rule<V: Visitor + ?Sized>(v: &mut V, rule: &Rule) {
    v.visit_location(rule.location.as_ref());
    if let Some(key) = &rule.head.key {
        v.visit_term(key);
    }
    if let Some(value) = &rule.head.value {
        v.visit_term(value);
    }
    for expr in &rule.body {
        v.visit_expr(expr);
    }
}

pub fn walk_expr<V: Visitor + ?Sized>(v: &mut V, expr: &Expr) {
    v.visit_location(expr.location.as_ref());
    match &expr.kind {
        ExprKind::Term(t) => v.visit_term(t),
        ExprKind::Unify(a, b) | ExprKind::Assign(a, b) => {
            v.visit_term(a);
            v.visit_term(b);
        }
        ExprKind::Compare { lhs, rhs, .. } => {
            v.visit_term(lhs);
            v.visit_term(rhs);
        }
        ExprKind::Not(inner) => v.visit_expr(inner),
        ExprKind::Some(_) => {}
    }
}

pub fn walk_term<V: Visitor + ?Sized>(v: &mut V, term: &Term) {
    v.visit_location(term.location.as_ref());
    match &term.kind {
        TermKind::Null
        | TermKind::Boolean(_)
        | TermKind::Number(_)
        | TermKind::String(_)
        | TermKind::Var(_) => {}
        TermKind::Ref(items) | TermKind::Array(items) | TermKind::Set(items) => {
            for item in items {
                v.visit_term(item);
            }
        }
        TermKind::Call { args, .. } => {
            for arg in args {
                v.visit_term(arg);
            }
        }
        TermKind::Object(pairs) => {
            for (key, value) in pairs {
                v.visit_term(key);
                v.visit_term(value);
            }
        }
        TermKind::ArrayComprehension { term, body } | TermKind::SetComprehension { term, body } => {
            v.visit_term(term);
            for expr in body {
                v.visit_expr(expr);
            }
        }
        TermKind::ObjectComprehension { key, value, body } => {
            v.visit_term(key);
            v.visit_term(value);
            for expr in body {
                v.visit_expr(expr);
            }
        }
    }
}

/// Mutating visitor.
pub trait VisitorMut {
    fn visit_module_mut(&mut self, module: &mut Module) {
        walk_module_mut(self, module);
    }

    fn visit_rule_mut(&mut self, rule: &mut Rule) {
        walk_rule_mut(self, rule);
    }

    fn visit_expr_mut(&mut self, expr: &mut Expr) {
        walk_expr_mut(self, expr);
    }

    fn visit_term_mut(&mut self, term: &mut Term) {
        walk_term_mut(self, term);
    }

    fn visit_location_mut(&mut self, _location: &mut Option<Location>) {}
}

pub fn walk_module_mut<V: VisitorMut + ?Sized>(v: &mut V, module: &mut Module) {
    v.visit_location_mut(&mut module.package.location);
    for import in &mut module.imports {
        v.visit_location_mut(&mut import.location);
    }
    for rule in &mut module.rules {
        v.visit_rule_mut(rule);
    }
}

pub fn walk_rule_mut<V: VisitorMut + ?Sized>(v: &mut V, rule: &mut Rule) {
    v.visit_location_mut(&mut rule.location);
    if let Some(key) = &mut rule.head.key {
        v.visit_term_mut(key);
    }
    if let Some(value) = &mut rule.head.value {
        v.visit_term_mut(value);
    }
    for expr in &mut rule.body {
        v.visit_expr_mut(expr);
    }
}

pub fn walk_expr_mut<V: VisitorMut + ?Sized>(v: &mut V, expr: &mut Expr) {
    v.visit_location_mut(&mut expr.location);
    match &mut expr.kind {
        ExprKind::Term(t) => v.visit_term_mut(t),
        ExprKind::Unify(a, b) | ExprKind::Assign(a, b) => {
            v.visit_term_mut(a);
            v.visit_term_mut(b);
        }
        ExprKind::Compare { lhs, rhs, .. } => {
            v.visit_term_mut(lhs);
            v.visit_term_mut(rhs);
        }
        ExprKind::Not(inner) => v.visit_expr_mut(inner),
        ExprKind::Some(_) => {}
    }
}

pub fn walk_term_mut<V: VisitorMut + ?Sized>(v: &mut V, term: &mut Term) {
    v.visit_location_mut(&mut term.location);
    match &mut term.kind {
        TermKind::Null
        | TermKind::Boolean(_)
        | TermKind::Number(_)
        | TermKind::String(_)
        | TermKind::Var(_) => {}
        TermKind::Ref(items) | TermKind::Array(items) | TermKind::Set(items) => {
            for item in items {
                v.visit_term_mut(item);
            }
        }
        TermKind::Call { args, .. } => {
            for arg in args {
                v.visit_term_mut(arg);
            }
        }
        TermKind::Object(pairs) => {
            for (key, value) in pairs {
                v.visit_term_mut(key);
                v.visit_term_mut(value);
            }
        }
        TermKind::ArrayComprehension { term, body } | TermKind::SetComprehension { term, body } => {
            v.visit_term_mut(term);
            for expr in body {
                v.visit_expr_mut(expr);
            }
        }
        TermKind::ObjectComprehension { key, value, body } => {
            v.visit_term_mut(key);
            v.visit_term_mut(value);
            for expr in body {
                v.visit_expr_mut(expr);
            }
        }
    }
}

struct LocationStripper;

impl VisitorMut for LocationStripper {
    fn visit_location_mut(&mut self, location: &mut Option<Location>) {
        *location = None;
    }
}

/// Remove every source location from the module, leaving rule links intact.
pub fn strip_locations(module: &mut Module) {
    LocationStripper.visit_module_mut(module);
}

struct LocationCounter(usize);

impl Visitor for LocationCounter {
    fn visit_location(&mut self, location: Option<&Location>) {
        if location.is_some() {
            self.0 += 1;
        }
    }
}

/// Number of nodes in the module that carry a source location.
#[must_use]
pub fn count_locations(module: &Module) -> usize {
    let mut counter = LocationCounter(0);
    counter.visit_module(module);
    counter.0
}

#[derive(Clone, Copy)]
enum Node<'a> {
    Expr(&'a Expr),
    Term(&'a Term),
}

/// Deepest nesting of expressions and terms in any rule of `module`.
///
/// Uses an explicit stack rather than recursion, so it is safe to call on a
/// tree of any depth.
#[must_use]
pub fn max_depth(module: &Module) -> usize {
    deepest(module.rules.iter().flat_map(|rule| {
        rule.head
            .key
            .iter()
            .chain(&rule.head.value)
            .map(Node::Term)
            .chain(rule.body.iter().map(Node::Expr))
    }))
}

/// Deepest nesting of expressions and terms in a query body.
#[must_use]
pub fn max_body_depth(body: &[Expr]) -> usize {
    deepest(body.iter().map(Node::Expr))
}

fn deepest<'a>(roots: impl Iterator<Item = Node<'a>>) -> usize {
    let mut stack: Vec<(Node<'a>, usize)> = roots.map(|node| (node, 1)).collect();
    let mut max = 0;
    while let Some((node, depth)) = stack.pop() {
        max = max.max(depth);
        let next = depth + 1;
        match node {
            Node::Expr(expr) => match &expr.kind {
                ExprKind::Term(t) => stack.push((Node::Term(t), next)),
                ExprKind::Unify(a, b)
                | ExprKind::Assign(a, b)
                | ExprKind::Compare { lhs: a, rhs: b, .. } => {
                    stack.push((Node::Term(a), next));
                    stack.push((Node::Term(b), next));
                }
                ExprKind::Not(inner) => stack.push((Node::Expr(inner), next)),
                ExprKind::Some(_) => {}
            },
            Node::Term(term) => match &term.kind {
                TermKind::Null
                | TermKind::Boolean(_)
                | TermKind::Number(_)
                | TermKind::String(_)
                | TermKind::Var(_) => {}
                TermKind::Ref(items)
                | TermKind::Array(items)
                | TermKind::Set(items)
                | TermKind::Call { args: items, .. } => {
                    stack.extend(items.iter().map(|t| (Node::Term(t), next)));
                }
                TermKind::Object(pairs) => {
                    for (key, value) in pairs {
                        stack.push((Node::Term(key), next));
                        stack.push((Node::Term(value), next));
                    }
                }
                TermKind::ArrayComprehension { term, body } | TermKind::SetComprehension { term, body } => {
                    stack.push((Node::Term(term), next));
                    stack.extend(body.iter().map(|e| (Node::Expr(e), next)));
                }
                TermKind::ObjectComprehension { key, value, body } => {
                    stack.push((Node::Term(key), next));
                    stack.push((Node::Term(value), next));
                    stack.extend(body.iter().map(|e| (Node::Expr(e), next)));
                }
            },
        }
    }
    max
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_module;

    const SOURCE: &str = r#"package test
import data.lib.users as u

allow = x {
    x := [y | y := input.items[_]; y > 1]
    not u.banned[input.user]
}
"#;

    #[test]
    fn parsed_module_carries_locations() {
        let module = parse_module("test.rego", SOURCE).unwrap();
        assert!(count_locations(&module) > 10);
    }

    #[test]
    fn strip_removes_every_location() {
        let mut module = parse_module("test.rego", SOURCE).unwrap();
        strip_locations(&mut module);
        assert_eq!(count_locations(&module), 0);
        assert!(module.is_linked(), "stripping must not touch rule links");
    }

    #[test]
    fn strip_preserves_structure() {
        let original = parse_module("test.rego", SOURCE).unwrap();
        let mut stripped = original.clone();
        strip_locations(&mut stripped);
        assert_eq!(original.to_string(), stripped.to_string());
    }

    #[test]
    fn custom_visitor_sees_nested_comprehension_terms() {
        struct Vars(Vec<String>);
        impl Visitor for Vars {
            fn visit_term(&mut self, term: &Term) {
                if let TermKind::Var(name) = &term.kind {
                    self.0.push(name.clone());
                }
                walk_term(self, term);
            }
        }

        let module = parse_module("test.rego", SOURCE).unwrap();
        let mut vars = Vars(Vec::new());
        vars.visit_module(&module);
        assert!(vars.0.contains(&"y".to_owned()));
        assert!(vars.0.contains(&"u".to_owned()));
    }

    #[test]
    fn depth_counts_terms_and_exprs() {
        let module = parse_module("test.rego", "package p\nr = 1\ns = [[1]]\nt { not [1][0] == 1 }\n").unwrap();
        // not -> compare -> ref -> array -> 1
        assert_eq!(max_depth(&module), 5);
        assert_eq!(max_depth(&Module::new(vec!["p".into()])), 0);
    }

    #[test]
    fn depth_of_a_deep_chain_needs_no_recursion() {
        let mut term = Term::int(1);
        for _ in 0..100_000 {
            term = Term::new(TermKind::Array(vec![term]));
        }
        let body = vec![Expr::new(ExprKind::Term(term))];
        assert_eq!(max_body_depth(&body), 100_002);
        // Tear the chain down iteratively too.
        let mut next = body.into_iter().next().map(|e| e.kind);
        while let Some(ExprKind::Term(Term { kind: TermKind::Array(mut items), .. })) = next {
            next = items.pop().map(ExprKind::Term);
        }
    }
}
