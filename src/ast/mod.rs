//! Abstract syntax tree for policy modules.
//!
//! Every node kind is an enum variant, and every node that can carry a source
//! position does so through an optional [`Location`]. Locations and the
//! rule-to-module back-reference are marked `#[serde(skip)]`: the portable
//! (JSON) encoding has no slot for them.

pub(crate) mod pretty;
pub mod visit;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Number;

/// Root variable of the data document.
pub const DATA_ROOT: &str = "data";
/// Root variable of the input document.
pub const INPUT_ROOT: &str = "input";
/// Wildcard variable; every occurrence is a distinct fresh variable.
pub const WILDCARD: &str = "_";
/// Deepest chain of nested expressions and terms a rule or query may hold.
/// A rule's head terms and body expressions sit at depth 1.
pub const MAX_DEPTH: usize = 32;

/// Source position of a node, for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub row: u32,
    pub col: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.row, self.col)
    }
}

/// Weak back-reference from a rule to its owning module.
///
/// Holds the owning module's package path rather than a pointer, so a module
/// and its rules never form an ownership cycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleLink {
    package: Vec<String>,
}

impl ModuleLink {
    #[must_use]
    pub fn package(&self) -> &[String] {
        &self.package
    }
}

/// One compiled unit of policy source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub package: Package,
    #[serde(default)]
    pub imports: Vec<Import>,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl Module {
    /// Create a module for `package` with no imports or rules.
    #[must_use]
    pub fn new(package: Vec<String>) -> Self {
        Self {
            package: Package {
                path: package,
                location: None,
            },
            imports: Vec::new(),
            rules: Vec::new(),
        }
    }

    /// The link every rule of this module must carry.
    #[must_use]
    pub fn link(&self) -> ModuleLink {
        ModuleLink {
            package: self.package.path.clone(),
        }
    }

    /// Point every rule's back-reference at this module.
    pub fn link_rules(&mut self) {
        let link = self.link();
        for rule in &mut self.rules {
            rule.module = Some(link.clone());
        }
    }

    /// Append a rule, linking it to this module.
    pub fn push_rule(&mut self, mut rule: Rule) {
        rule.module = Some(self.link());
        self.rules.push(rule);
    }

    /// True if every rule's back-reference points at this module.
    #[must_use]
    pub fn is_linked(&self) -> bool {
        let link = self.link();
        self.rules.iter().all(|r| r.module.as_ref() == Some(&link))
    }

    /// Dotted package path, e.g. `a.b`.
    #[must_use]
    pub fn package_name(&self) -> String {
        self.package.path.join(".")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub path: Vec<String>,
    #[serde(skip)]
    pub location: Option<Location>,
}

/// `import data.a.b as c`. The path includes its root (`data` or `input`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub path: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(skip)]
    pub location: Option<Location>,
}

impl Import {
    /// The name the import is bound to inside the module.
    #[must_use]
    pub fn binding(&self) -> &str {
        self.alias
            .as_deref()
            .or_else(|| self.path.last().map(String::as_str))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub default: bool,
    pub head: Head,
    /// Empty means the rule holds unconditionally.
    #[serde(default)]
    pub body: Vec<Expr>,
    #[serde(skip)]
    pub location: Option<Location>,
    #[serde(skip)]
    pub module: Option<ModuleLink>,
}

impl Rule {
    #[must_use]
    pub fn kind(&self) -> RuleKind {
        self.head.kind()
    }

    /// `data.<package>.<name>`, if the rule is linked to a module.
    #[must_use]
    pub fn path(&self) -> Option<String> {
        let link = self.module.as_ref()?;
        let mut segments = vec![DATA_ROOT.to_owned()];
        segments.extend(link.package.iter().cloned());
        segments.push(self.head.name.clone());
        Some(segments.join("."))
    }
}

/// Rule head: `name`, `name = value`, `name[key]`, `name[key] = value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Head {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<Term>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Term>,
    /// Written with `:=` rather than `=`.
    #[serde(default)]
    pub assign: bool,
}

impl Head {
    #[must_use]
    pub fn kind(&self) -> RuleKind {
        match (&self.key, &self.value) {
            (None, _) => RuleKind::Complete,
            (Some(_), None) => RuleKind::PartialSet,
            (Some(_), Some(_)) => RuleKind::PartialObject,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleKind {
    Complete,
    PartialSet,
    PartialObject,
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleKind::Complete => write!(f, "complete"),
            RuleKind::PartialSet => write!(f, "partial set"),
            RuleKind::PartialObject => write!(f, "partial object"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expr {
    pub kind: ExprKind,
    #[serde(skip)]
    pub location: Option<Location>,
}

impl Expr {
    #[must_use]
    pub fn new(kind: ExprKind) -> Self {
        Self {
            kind,
            location: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprKind {
    /// Holds unless the term is `false` or undefined.
    Term(Term),
    /// `a = b`
    Unify(Term, Term),
    /// `a := b`
    Assign(Term, Term),
    Compare {
        op: CompareOp,
        lhs: Term,
        rhs: Term,
    },
    Not(Box<Expr>),
    Some(Vec<String>),
}

/// Comparison operators supported in rule bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

impl CompareOp {
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            CompareOp::Eq => "==",
            CompareOp::Neq => "!=",
            CompareOp::Gt => ">",
            CompareOp::Gte => ">=",
            CompareOp::Lt => "<",
            CompareOp::Lte => "<=",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub kind: TermKind,
    #[serde(skip)]
    pub location: Option<Location>,
}

impl Term {
    #[must_use]
    pub fn new(kind: TermKind) -> Self {
        Self {
            kind,
            location: None,
        }
    }

    #[must_use]
    pub fn var(name: impl Into<String>) -> Self {
        Self::new(TermKind::Var(name.into()))
    }

    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::new(TermKind::String(s.into()))
    }

    #[must_use]
    pub fn boolean(b: bool) -> Self {
        Self::new(TermKind::Boolean(b))
    }

    #[must_use]
    pub fn int(v: i64) -> Self {
        Self::new(TermKind::Number(Number::Int(v)))
    }

    /// A ref from a root variable and dotted field names, e.g. `data.a.b`.
    #[must_use]
    pub fn path(root: &str, fields: &[String]) -> Self {
        let mut segments = Vec::with_capacity(fields.len() + 1);
        segments.push(Term::var(root));
        segments.extend(fields.iter().map(Term::string));
        Self::new(TermKind::Ref(segments))
    }

    #[must_use]
    pub fn as_var(&self) -> Option<&str> {
        match &self.kind {
            TermKind::Var(name) => Some(name),
            _ => None,
        }
    }

    #[must_use]
    pub fn with_location(mut self, location: Option<Location>) -> Self {
        self.location = location;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TermKind {
    Null,
    Boolean(bool),
    Number(Number),
    String(String),
    Var(String),
    /// Head variable followed by path segments; `a.b` stores `b` as a string.
    Ref(Vec<Term>),
    Array(Vec<Term>),
    Object(Vec<(Term, Term)>),
    Set(Vec<Term>),
    /// Builtin call. Infix operators are calls too (`1 + 2` is `plus(1, 2)`).
    Call {
        operator: String,
        args: Vec<Term>,
    },
    ArrayComprehension {
        term: Box<Term>,
        body: Vec<Expr>,
    },
    SetComprehension {
        term: Box<Term>,
        body: Vec<Expr>,
    },
    ObjectComprehension {
        key: Box<Term>,
        value: Box<Term>,
        body: Vec<Expr>,
    },
}
