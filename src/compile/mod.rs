//! Turns parsed modules into a [`CompiledSet`].
//!
//! Compilation runs every check over every module and reports all
//! diagnostics together; it never returns a partially compiled set.

mod deps;
mod rewrite;
mod safety;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{Level, debug, instrument};

use crate::ast::{DATA_ROOT, Expr, ExprKind, Location, Module, Rule, RuleKind, Term};
use crate::types::{CompileError, CompileErrorKind, CompileErrors, CompiledSet, RuleGroup};

use rewrite::{Globals, Rewriter};

/// Prefix of the variables that capture query term values.
pub(crate) const CAPTURE_PREFIX: &str = "$q";

/// Compile a set of modules keyed by module id.
///
/// # Errors
///
/// Returns every diagnostic found if any module fails a check.
#[instrument(level = Level::TRACE, skip(modules), fields(modules = modules.len()))]
pub fn compile(modules: BTreeMap<String, Module>) -> Result<CompiledSet, CompileErrors> {
    let mut errors = Vec::new();

    let mut rule_names: HashMap<&[String], BTreeSet<String>> = HashMap::new();
    for module in modules.values() {
        rule_names
            .entry(module.package.path.as_slice())
            .or_default()
            .extend(module.rules.iter().map(|r| r.head.name.clone()));
    }

    let mut groups: BTreeMap<Vec<String>, RuleGroup> = BTreeMap::new();
    let no_rules = BTreeSet::new();
    for (id, module) in &modules {
        check_links(id, module, &mut errors);
        let mut rewriter = Rewriter::new(Globals {
            package: &module.package.path,
            rules: rule_names
                .get(module.package.path.as_slice())
                .unwrap_or(&no_rules),
            imports: &module.imports,
        });
        for rule in &module.rules {
            let mut rule = rule.clone();
            rewriter.rule(&mut rule);
            errors.append(&mut rewriter.errors);
            safety::check_rule(&mut rule, &mut errors);
            add_to_group(&mut groups, &module.package.path, rule, &mut errors);
        }
    }

    if let Err(cycle) = deps::topological_sort(&groups) {
        let location = cycle_location(&groups, &cycle);
        errors.push(CompileError::new(
            CompileErrorKind::Recursion { path: cycle },
            location,
        ));
    }

    if let Err(errors) = CompileErrors::check(errors) {
        debug!(errors = errors.errors().len(), "compilation failed");
        return Err(errors);
    }
    debug!(groups = groups.len(), "compiled");
    Ok(CompiledSet { modules, groups })
}

fn check_links(id: &str, module: &Module, errors: &mut Vec<CompileError>) {
    if module.is_linked() {
        return;
    }
    let link = module.link();
    for rule in &module.rules {
        if rule.module.as_ref() != Some(&link) {
            errors.push(CompileError::new(
                CompileErrorKind::UnlinkedRule {
                    module: id.to_owned(),
                    rule: rule.head.name.clone(),
                },
                rule.location.as_ref(),
            ));
        }
    }
}

fn render_path(path: &[String]) -> String {
    std::iter::once(DATA_ROOT)
        .chain(path.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(".")
}

fn add_to_group(
    groups: &mut BTreeMap<Vec<String>, RuleGroup>,
    package: &[String],
    rule: Rule,
    errors: &mut Vec<CompileError>,
) {
    let mut path = package.to_vec();
    path.push(rule.head.name.clone());
    let kind = if rule.default { RuleKind::Complete } else { rule.kind() };

    let group = groups.entry(path.clone()).or_insert_with(|| RuleGroup {
        path: path.clone(),
        kind,
        rules: Vec::new(),
        default: None,
    });

    if group.kind != kind {
        errors.push(CompileError::new(
            CompileErrorKind::ConflictingRuleKinds {
                path: render_path(&path),
                first: group.kind,
                second: kind,
            },
            rule.location.as_ref(),
        ));
        return;
    }

    if !rule.default {
        group.rules.push(rule);
        return;
    }
    if group.default.is_some() {
        errors.push(CompileError::new(
            CompileErrorKind::MultipleDefaults {
                path: render_path(&path),
            },
            rule.location.as_ref(),
        ));
        return;
    }
    group.default = Some(rule.head.value.unwrap_or_else(|| Term::boolean(true)));
}

fn cycle_location<'a>(groups: &'a BTreeMap<Vec<String>, RuleGroup>, cycle: &[String]) -> Option<&'a Location> {
    let first = cycle.first()?;
    groups
        .values()
        .find(|g| render_path(&g.path) == *first)
        .and_then(|g| g.rules.first())
        .and_then(|r| r.location.as_ref())
}

/// Where a query expression's result value comes from.
#[derive(Debug, Clone)]
pub(crate) struct QueryOutput {
    pub(crate) text: String,
    pub(crate) location: Option<Location>,
    /// Variable holding a term expression's value. `None` for every other
    /// expression kind, whose value is `true`.
    pub(crate) capture: Option<String>,
}

#[derive(Debug, Clone)]
pub(crate) struct CompiledQuery {
    pub(crate) body: Vec<Expr>,
    pub(crate) outputs: Vec<QueryOutput>,
}

/// Resolve and reorder an ad-hoc query. Queries see no package: rules are
/// addressed through `data`.
pub(crate) fn compile_query(exprs: Vec<Expr>) -> Result<CompiledQuery, CompileErrors> {
    let mut body = Vec::with_capacity(exprs.len());
    let mut outputs = Vec::with_capacity(exprs.len());

    for (i, expr) in exprs.into_iter().enumerate() {
        let text = expr.to_string();
        let location = expr.location.clone();
        let capture = match expr.kind {
            ExprKind::Term(term) => {
                let var = format!("{CAPTURE_PREFIX}{i}");
                let capture = Term::var(var.as_str()).with_location(term.location.clone());
                body.push(Expr {
                    kind: ExprKind::Unify(capture, term),
                    location: location.clone(),
                });
                Some(var)
            }
            kind => {
                body.push(Expr {
                    kind,
                    location: location.clone(),
                });
                None
            }
        };
        outputs.push(QueryOutput {
            text,
            location,
            capture,
        });
    }

    let no_rules = BTreeSet::new();
    let mut rewriter = Rewriter::new(Globals {
        package: &[],
        rules: &no_rules,
        imports: &[],
    });
    rewriter.body(&mut body);
    let mut errors = std::mem::take(&mut rewriter.errors);

    let mut bound = safety::root_vars();
    safety::reorder(&mut body, &mut bound, &mut errors);
    CompileErrors::check(errors)?;

    Ok(CompiledQuery { body, outputs })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::{parse_module, parse_query};

    fn modules(sources: &[(&str, &str)]) -> BTreeMap<String, Module> {
        sources
            .iter()
            .map(|(id, src)| ((*id).to_owned(), parse_module(id, src).unwrap()))
            .collect()
    }

    fn kinds(errors: &CompileErrors) -> Vec<CompileErrorKind> {
        errors.iter().map(|e| e.kind.clone()).collect()
    }

    #[test]
    fn groups_span_modules() {
        let compiled = compile(modules(&[
            ("a.rego", "package p\nr[1] { true }\n"),
            ("b.rego", "package p\nr[2] { true }\ns { r[2] }\n"),
        ]))
        .unwrap();
        let group = compiled.group(&["p", "r"]).unwrap();
        assert_eq!(group.len(), 2);
        assert_eq!(group.kind(), RuleKind::PartialSet);
    }

    #[test]
    fn default_rule_is_recorded() {
        let compiled = compile(modules(&[("m", "package testing\nt = 10 { true }\ndefault b = 8\n")])).unwrap();
        assert!(compiled.group(&["testing", "b"]).unwrap().has_default());
        assert!(compiled.group(&["testing", "b"]).unwrap().is_empty());
    }

    #[test]
    fn conflicting_kinds() {
        let errors = compile(modules(&[("m", "package p\nr = 1\nr[x] { x := 1 }\n")])).unwrap_err();
        assert_eq!(
            kinds(&errors),
            vec![CompileErrorKind::ConflictingRuleKinds {
                path: "data.p.r".into(),
                first: RuleKind::Complete,
                second: RuleKind::PartialSet,
            }]
        );
    }

    #[test]
    fn multiple_defaults() {
        let errors = compile(modules(&[("m", "package p\ndefault r = 1\ndefault r = 2\n")])).unwrap_err();
        assert_eq!(
            kinds(&errors),
            vec![CompileErrorKind::MultipleDefaults { path: "data.p.r".into() }]
        );
    }

    #[test]
    fn every_error_is_reported() {
        let errors = compile(modules(&[("m", "package p\na { x > 1 }\nb { frob(1) }\n")])).unwrap_err();
        assert_eq!(errors.errors().len(), 2);
        assert!(errors.to_string().starts_with("2 errors occurred:"));
    }

    #[test]
    fn unlinked_rules_are_rejected() {
        let mut all = modules(&[("m", "package p\nr = 1\n")]);
        if let Some(module) = all.get_mut("m") {
            module.rules[0].module = None;
        }
        let errors = compile(all).unwrap_err();
        assert_eq!(
            kinds(&errors),
            vec![CompileErrorKind::UnlinkedRule {
                module: "m".into(),
                rule: "r".into()
            }]
        );
    }

    #[test]
    fn query_terms_are_captured() {
        let query = compile_query(parse_query("data.p.r; x := 1").unwrap()).unwrap();
        assert_eq!(query.outputs[0].text, "data.p.r");
        assert_eq!(query.outputs[0].capture.as_deref(), Some("$q0"));
        assert_eq!(query.outputs[1].capture, None);
        assert_eq!(query.body[0].to_string(), "$q0 = data.p.r");
    }

    #[test]
    fn query_with_unsafe_var_fails() {
        let errors = compile_query(parse_query("x > 1").unwrap()).unwrap_err();
        assert_eq!(kinds(&errors), vec![CompileErrorKind::UnsafeVar { var: "x".into() }]);
    }
}
