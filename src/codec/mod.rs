//! Byte encodings of a [`Module`].
//!
//! Two profiles are available:
//!
//! - [`Profile::Portable`]: a JSON document. Source locations and rule links
//!   have no slot in it.
//! - [`Profile::FullFidelity`]: a checksummed binary blob that keeps every
//!   location. Requires the `binary-codec` feature.
//!
//! Neither profile stores the rule-to-module link. Encoding borrows the
//! module immutably; decoding validates the tree and relinks every rule to
//! the decoded module before handing it out.

#[cfg(feature = "binary-codec")]
pub mod binary;
pub mod portable;

use std::fmt;

use thiserror::Error;

use crate::ast::visit::{Visitor, max_depth, walk_expr, walk_rule, walk_term};
use crate::ast::{DATA_ROOT, Expr, ExprKind, INPUT_ROOT, MAX_DEPTH, Module, Rule, Term, TermKind};

/// Which encoding to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Profile {
    #[default]
    Portable,
    FullFidelity,
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Portable => f.write_str("portable"),
            Profile::FullFidelity => f.write_str("full-fidelity"),
        }
    }
}

/// Errors that can occur when encoding a [`Module`].
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to encode module as JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "binary-codec")]
    #[error("failed to encode module: {0}")]
    Binary(#[from] bincode::error::EncodeError),

    #[error("module too large to encode: {0} bytes")]
    TooLarge(usize),

    #[error("module nests deeper than {limit} levels")]
    TooDeep { limit: usize },

    #[error("{0} profile is not available (enable the `binary-codec` feature)")]
    Unsupported(Profile),
}

/// Errors that can occur when decoding a [`Module`]. A failed decode never
/// yields a partial module.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("failed to decode module JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("not a regolith module: invalid magic bytes")]
    BadMagic,

    #[error("incompatible format version: blob is v{blob}, codec supports v{supported}")]
    IncompatibleVersion { blob: u16, supported: u16 },

    #[error("integrity check failed: BLAKE3 checksum mismatch")]
    ChecksumMismatch,

    #[error("payload length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[cfg(feature = "binary-codec")]
    #[error("failed to decode payload: {0}")]
    Binary(#[from] bincode::error::DecodeError),

    #[error("module nests deeper than {limit} levels")]
    TooDeep { limit: usize },

    #[error("invalid module: {0}")]
    Validation(String),

    #[error("{0} profile is not available (enable the `binary-codec` feature)")]
    Unsupported(Profile),
}

/// Encode `module` with the chosen profile.
///
/// # Errors
///
/// Returns [`EncodeError`] if the profile's encoder fails or is disabled.
pub fn encode(module: &Module, profile: Profile) -> Result<Vec<u8>, EncodeError> {
    match profile {
        Profile::Portable => portable::encode(module),
        #[cfg(feature = "binary-codec")]
        Profile::FullFidelity => binary::encode(module),
        #[cfg(not(feature = "binary-codec"))]
        Profile::FullFidelity => Err(EncodeError::Unsupported(profile)),
    }
}

/// Decode bytes produced by [`encode`] with the same profile.
///
/// # Errors
///
/// Returns [`DecodeError`] if the bytes are malformed, truncated or do not
/// describe a valid module.
pub fn decode(bytes: &[u8], profile: Profile) -> Result<Module, DecodeError> {
    match profile {
        Profile::Portable => portable::decode(bytes),
        #[cfg(feature = "binary-codec")]
        Profile::FullFidelity => binary::decode(bytes),
        #[cfg(not(feature = "binary-codec"))]
        Profile::FullFidelity => Err(DecodeError::Unsupported(profile)),
    }
}

/// Refuse to encode a tree the decoders would reject for its depth.
pub(crate) fn check_depth(module: &Module) -> Result<(), EncodeError> {
    if max_depth(module) > MAX_DEPTH {
        return Err(EncodeError::TooDeep { limit: MAX_DEPTH });
    }
    Ok(())
}

/// Validate a freshly decoded tree and link its rules.
pub(crate) fn finish(mut module: Module) -> Result<Module, DecodeError> {
    validate(&module)?;
    module.link_rules();
    Ok(module)
}

/// Structural checks shared by both decoders. These reject trees the parser
/// could never have produced; they are not a substitute for compilation.
pub(crate) fn validate(module: &Module) -> Result<(), DecodeError> {
    if max_depth(module) > MAX_DEPTH {
        return Err(DecodeError::TooDeep { limit: MAX_DEPTH });
    }
    if module.package.path.is_empty() {
        return Err(invalid("empty package path"));
    }
    if module.package.path.iter().any(String::is_empty) {
        return Err(invalid("empty package path segment"));
    }
    for import in &module.imports {
        match import.path.first().map(String::as_str) {
            Some(DATA_ROOT | INPUT_ROOT) => {}
            Some(root) => return Err(invalid(format!("import rooted at `{root}`"))),
            None => return Err(invalid("empty import path")),
        }
        if import.alias.as_deref() == Some("") {
            return Err(invalid("empty import alias"));
        }
    }

    let mut validator = Validator { problem: None };
    for rule in &module.rules {
        validator.visit_rule(rule);
        if let Some(problem) = validator.problem.take() {
            return Err(invalid(format!("rule `{}`: {problem}", rule.head.name)));
        }
    }
    Ok(())
}

fn invalid(message: impl Into<String>) -> DecodeError {
    DecodeError::Validation(message.into())
}

/// Records the first structural problem found.
struct Validator {
    problem: Option<String>,
}

impl Validator {
    fn report(&mut self, problem: impl Into<String>) {
        if self.problem.is_none() {
            self.problem = Some(problem.into());
        }
    }
}

impl Visitor for Validator {
    fn visit_rule(&mut self, rule: &Rule) {
        if rule.head.name.is_empty() {
            self.report("empty rule name");
        }
        if rule.default && (rule.head.key.is_some() || rule.head.value.is_none() || !rule.body.is_empty()) {
            self.report("default rule must be `default name = value`");
        }
        if rule.head.key.is_none() && rule.head.value.is_none() && rule.body.is_empty() {
            self.report("rule has neither a value nor a body");
        }
        walk_rule(self, rule);
    }

    fn visit_expr(&mut self, expr: &Expr) {
        if let ExprKind::Some(vars) = &expr.kind
            && (vars.is_empty() || vars.iter().any(String::is_empty))
        {
            self.report("`some` declares no variables");
        }
        walk_expr(self, expr);
    }

    fn visit_term(&mut self, term: &Term) {
        match &term.kind {
            TermKind::Var(name) if name.is_empty() => self.report("empty variable name"),
            TermKind::Ref(segments) => match segments.first().map(|t| &t.kind) {
                None => self.report("empty reference"),
                Some(_) if segments.len() < 2 => self.report("reference without segments"),
                Some(_) => {}
            },
            TermKind::Call { operator, .. } if operator.is_empty() => self.report("call without operator"),
            TermKind::ArrayComprehension { body, .. }
            | TermKind::SetComprehension { body, .. }
            | TermKind::ObjectComprehension { body, .. }
                if body.is_empty() =>
            {
                self.report("comprehension with empty body");
            }
            _ => {}
        }
        walk_term(self, term);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Head;
    use crate::parse::parse_module;

    const SOURCE: &str = r#"package app.rbac
import data.lib.roles as roles

default allow = false

allow {
    some i
    input.user.roles[i] == roles.admin
}

names[n] { n := input.users[_].name }
"#;

    #[test]
    fn parsed_modules_validate() {
        let module = parse_module("rbac.rego", SOURCE).unwrap();
        assert!(validate(&module).is_ok());
    }

    #[test]
    fn empty_package_rejected() {
        let module = Module::new(Vec::new());
        assert!(matches!(validate(&module), Err(DecodeError::Validation(_))));
    }

    #[test]
    fn bare_ref_rejected() {
        let mut module = Module::new(vec!["p".into()]);
        module.push_rule(Rule {
            default: false,
            head: Head {
                name: "r".into(),
                key: None,
                value: Some(Term::new(TermKind::Ref(vec![Term::var("x")]))),
                assign: false,
            },
            body: Vec::new(),
            location: None,
            module: None,
        });
        let err = validate(&module).unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid module: rule `r`: reference without segments"
        );
    }

    #[test]
    fn finish_links_rules() {
        let mut module = parse_module("m", SOURCE).unwrap();
        for rule in &mut module.rules {
            rule.module = None;
        }
        let module = finish(module).unwrap();
        assert!(module.is_linked());
    }

    fn nested_module(levels: usize) -> Module {
        let mut term = Term::int(1);
        for _ in 0..levels {
            term = Term::new(TermKind::Array(vec![term]));
        }
        let mut module = Module::new(vec!["p".into()]);
        module.push_rule(Rule {
            default: false,
            head: Head {
                name: "r".into(),
                key: None,
                value: Some(term),
                assign: false,
            },
            body: Vec::new(),
            location: None,
            module: None,
        });
        module
    }

    #[test]
    fn over_deep_trees_are_rejected_both_ways() {
        let deep = nested_module(MAX_DEPTH);
        assert!(matches!(check_depth(&deep), Err(EncodeError::TooDeep { limit: MAX_DEPTH })));
        assert!(matches!(validate(&deep), Err(DecodeError::TooDeep { limit: MAX_DEPTH })));
        let fits = nested_module(MAX_DEPTH - 1);
        assert!(check_depth(&fits).is_ok());
        assert!(validate(&fits).is_ok());
    }

    #[cfg(feature = "binary-codec")]
    #[test]
    fn profiles_dispatch() {
        let module = parse_module("m", SOURCE).unwrap();
        for profile in [Profile::Portable, Profile::FullFidelity] {
            let bytes = encode(&module, profile).unwrap();
            let decoded = decode(&bytes, profile).unwrap();
            assert_eq!(decoded.to_string(), module.to_string(), "{profile}");
        }
    }

    #[cfg(feature = "binary-codec")]
    #[test]
    fn profiles_are_not_interchangeable() {
        let module = parse_module("m", SOURCE).unwrap();
        let json = encode(&module, Profile::Portable).unwrap();
        assert!(matches!(decode(&json, Profile::FullFidelity), Err(DecodeError::BadMagic)));
        let blob = encode(&module, Profile::FullFidelity).unwrap();
        assert!(matches!(decode(&blob, Profile::Portable), Err(DecodeError::Json(_))));
    }
}
