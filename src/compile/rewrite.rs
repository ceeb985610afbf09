//! Name resolution.
//!
//! Rule references become `data` refs, import bindings become their paths,
//! every `_` becomes a distinct generated variable, and `:=`/`some`
//! declarations shadow package-level names from that point on.

use std::collections::BTreeSet;

use crate::ast::{
    DATA_ROOT, Expr, ExprKind, INPUT_ROOT, Import, Location, Rule, Term, TermKind, WILDCARD,
};
use crate::evaluate::builtins;
use crate::types::{CompileError, CompileErrorKind};

/// Prefix of generated wildcard variables.
pub(crate) const WILDCARD_PREFIX: &str = "$w";

/// Package-level names visible inside a rule body.
pub(crate) struct Globals<'a> {
    pub(crate) package: &'a [String],
    pub(crate) rules: &'a BTreeSet<String>,
    pub(crate) imports: &'a [Import],
}

pub(crate) struct Rewriter<'a> {
    globals: Globals<'a>,
    scopes: Vec<BTreeSet<String>>,
    fresh: usize,
    pub(crate) errors: Vec<CompileError>,
}

impl<'a> Rewriter<'a> {
    pub(crate) fn new(globals: Globals<'a>) -> Self {
        Self {
            globals,
            scopes: vec![BTreeSet::new()],
            fresh: 0,
            errors: Vec::new(),
        }
    }

    /// Resolve a rule's body first, then its head, so head variables see the
    /// body's declarations.
    pub(crate) fn rule(&mut self, rule: &mut Rule) {
        self.scopes = vec![BTreeSet::new()];
        self.fresh = 0;
        self.body(&mut rule.body);
        if let Some(key) = &mut rule.head.key {
            self.term(key);
        }
        if let Some(value) = &mut rule.head.value {
            self.term(value);
        }
    }

    pub(crate) fn body(&mut self, body: &mut [Expr]) {
        for expr in body {
            self.expr(expr);
        }
    }

    fn expr(&mut self, expr: &mut Expr) {
        let location = expr.location.clone();
        match &mut expr.kind {
            ExprKind::Term(term) => self.term(term),
            ExprKind::Unify(a, b) => {
                self.term(a);
                self.term(b);
            }
            ExprKind::Compare { lhs, rhs, .. } => {
                self.term(lhs);
                self.term(rhs);
            }
            ExprKind::Assign(lhs, rhs) => {
                self.term(rhs);
                if matches!(
                    lhs.kind,
                    TermKind::Var(_) | TermKind::Array(_) | TermKind::Object(_)
                ) {
                    self.declare_pattern(lhs, location.as_ref());
                } else {
                    self.errors.push(CompileError::new(
                        CompileErrorKind::InvalidAssignment {
                            target: lhs.to_string(),
                        },
                        lhs.location.as_ref().or(location.as_ref()),
                    ));
                }
            }
            ExprKind::Not(inner) => self.expr(inner),
            ExprKind::Some(vars) => {
                for var in vars.iter() {
                    self.declare(var, location.as_ref());
                }
            }
        }
    }

    fn declare_pattern(&mut self, pattern: &mut Term, location: Option<&Location>) {
        let location = pattern.location.clone().or_else(|| location.cloned());
        match &mut pattern.kind {
            TermKind::Var(name) if name == WILDCARD => {
                *name = self.fresh_var();
            }
            TermKind::Var(name) if name == DATA_ROOT || name == INPUT_ROOT => {
                self.errors.push(CompileError::new(
                    CompileErrorKind::InvalidAssignment {
                        target: name.clone(),
                    },
                    location.as_ref(),
                ));
            }
            TermKind::Var(name) => {
                let name = name.clone();
                self.declare(&name, location.as_ref());
            }
            TermKind::Array(items) => {
                for item in items {
                    self.declare_pattern(item, location.as_ref());
                }
            }
            TermKind::Object(pairs) => {
                for (key, value) in pairs {
                    self.term(key);
                    self.declare_pattern(value, location.as_ref());
                }
            }
            _ => self.term(pattern),
        }
    }

    fn declare(&mut self, name: &str, location: Option<&Location>) {
        if self.is_local(name) {
            self.errors.push(CompileError::new(
                CompileErrorKind::ReassignedVar {
                    var: name.to_owned(),
                },
                location,
            ));
            return;
        }
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_owned());
        }
    }

    fn is_local(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn fresh_var(&mut self) -> String {
        let name = format!("{WILDCARD_PREFIX}{}", self.fresh);
        self.fresh += 1;
        name
    }

    /// The path a non-local name stands for, as ref segments.
    fn resolve_global(&self, name: &str) -> Option<Vec<Term>> {
        if name == DATA_ROOT || name == INPUT_ROOT || self.is_local(name) {
            return None;
        }
        if let Some(import) = self.globals.imports.iter().find(|i| i.binding() == name) {
            let (root, fields) = import.path.split_first()?;
            let mut segments = vec![Term::var(root.as_str())];
            segments.extend(fields.iter().map(Term::string));
            return Some(segments);
        }
        if self.globals.rules.contains(name) {
            let mut segments = vec![Term::var(DATA_ROOT)];
            segments.extend(self.globals.package.iter().map(Term::string));
            segments.push(Term::string(name));
            return Some(segments);
        }
        None
    }

    fn term(&mut self, term: &mut Term) {
        let location = term.location.clone();
        match &mut term.kind {
            TermKind::Null | TermKind::Boolean(_) | TermKind::Number(_) | TermKind::String(_) => {}
            TermKind::Var(name) if name == WILDCARD => {
                *name = self.fresh_var();
            }
            TermKind::Var(name) => {
                if let Some(segments) = self.resolve_global(name) {
                    let segments = segments
                        .into_iter()
                        .map(|s| s.with_location(location.clone()))
                        .collect();
                    term.kind = TermKind::Ref(segments);
                }
            }
            TermKind::Ref(segments) => {
                for segment in segments.iter_mut().skip(1) {
                    self.term(segment);
                }
                let prefix = segments
                    .first()
                    .and_then(Term::as_var)
                    .and_then(|name| self.resolve_global(name));
                if let Some(prefix) = prefix {
                    let prefix = prefix.into_iter().map(|s| s.with_location(location.clone()));
                    segments.splice(0..1, prefix);
                }
            }
            TermKind::Array(items) | TermKind::Set(items) => {
                for item in items {
                    self.term(item);
                }
            }
            TermKind::Object(pairs) => {
                for (key, value) in pairs {
                    self.term(key);
                    self.term(value);
                }
            }
            TermKind::Call { operator, args } => {
                match builtins::lookup(operator) {
                    None => self.errors.push(CompileError::new(
                        CompileErrorKind::UnknownFunction {
                            name: operator.clone(),
                        },
                        location.as_ref(),
                    )),
                    Some(builtin) if builtin.arity != args.len() => {
                        self.errors.push(CompileError::new(
                            CompileErrorKind::WrongArity {
                                name: operator.clone(),
                                expected: builtin.arity,
                                got: args.len(),
                            },
                            location.as_ref(),
                        ));
                    }
                    Some(_) => {}
                }
                for arg in args {
                    self.term(arg);
                }
            }
            TermKind::ArrayComprehension { term, body }
            | TermKind::SetComprehension { term, body } => {
                self.scopes.push(BTreeSet::new());
                self.body(body);
                self.term(term);
                self.scopes.pop();
            }
            TermKind::ObjectComprehension { key, value, body } => {
                self.scopes.push(BTreeSet::new());
                self.body(body);
                self.term(key);
                self.term(value);
                self.scopes.pop();
            }
        }
    }
}
