use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{DATA_ROOT, Module, Rule, RuleKind, Term};
use crate::error::RegolithError;

/// All rules sharing one `data` path, after name resolution and body
/// reordering.
#[derive(Debug, Clone)]
pub struct RuleGroup {
    pub(crate) path: Vec<String>,
    pub(crate) kind: RuleKind,
    pub(crate) rules: Vec<Rule>,
    pub(crate) default: Option<Term>,
}

impl RuleGroup {
    /// Path below `data`: package segments followed by the rule name.
    #[must_use]
    pub fn path(&self) -> &[String] {
        &self.path
    }

    #[must_use]
    pub fn kind(&self) -> RuleKind {
        self.kind
    }

    /// Number of non-default definitions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    #[must_use]
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }
}

/// A linked, checked set of modules ready for querying.
///
/// Immutable once built; share it across threads behind an `Arc`.
#[derive(Debug, Clone)]
pub struct CompiledSet {
    pub(crate) modules: BTreeMap<String, Module>,
    pub(crate) groups: BTreeMap<Vec<String>, RuleGroup>,
}

impl CompiledSet {
    /// Parse and compile a single source text.
    ///
    /// # Errors
    ///
    /// Returns [`RegolithError`] if parsing or compilation fails.
    pub fn from_source(id: &str, source: &str) -> Result<Self, RegolithError> {
        let module = crate::parse::parse_module(id, source)?;
        let modules = BTreeMap::from([(id.to_owned(), module)]);
        Ok(crate::compile::compile(modules)?)
    }

    /// The modules as they were handed to the compiler, keyed by module id.
    #[must_use]
    pub fn modules(&self) -> &BTreeMap<String, Module> {
        &self.modules
    }

    #[must_use]
    pub fn module(&self, id: &str) -> Option<&Module> {
        self.modules.get(id)
    }

    /// Dotted package names defined by the set.
    #[must_use]
    pub fn packages(&self) -> BTreeSet<String> {
        self.modules.values().map(Module::package_name).collect()
    }

    /// Every rule path, as `data.<package>.<rule>`.
    pub fn rule_paths(&self) -> impl Iterator<Item = String> + '_ {
        self.groups.keys().map(|path| {
            std::iter::once(DATA_ROOT)
                .chain(path.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(".")
        })
    }

    /// The rule group at `path` (below `data`).
    #[must_use]
    pub fn group<S: AsRef<str>>(&self, path: &[S]) -> Option<&RuleGroup> {
        let key: Vec<String> = path.iter().map(|s| s.as_ref().to_owned()).collect();
        self.groups.get(&key)
    }

    /// Groups whose path starts with `prefix` and is strictly longer.
    pub(crate) fn groups_under<'a>(
        &'a self,
        prefix: &'a [String],
    ) -> impl Iterator<Item = &'a RuleGroup> + 'a {
        self.groups
            .range(prefix.to_vec()..)
            .take_while(move |(path, _)| path.starts_with(prefix))
            .filter(move |(path, _)| path.len() > prefix.len())
            .map(|(_, group)| group)
    }

    pub(crate) fn has_rules_under(&self, prefix: &[String]) -> bool {
        self.groups_under(prefix).next().is_some()
    }

    /// Distinct next path segments of the groups below `prefix`.
    pub(crate) fn children<'a>(&'a self, prefix: &'a [String]) -> BTreeSet<&'a str> {
        self.groups_under(prefix)
            .filter_map(|group| group.path.get(prefix.len()).map(String::as_str))
            .collect()
    }
}
