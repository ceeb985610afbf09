//! Canonical text form of the AST.
//!
//! The output is valid source: parsing it yields an equal tree (locations
//! aside). Codec round trips are checked by comparing this form.

use std::fmt;

use super::{Expr, ExprKind, Head, Import, Module, Package, Rule, Term, TermKind};

/// Infix operators and the builtin each one is sugar for, grouped by
/// precedence from loosest to tightest.
pub(crate) const INFIX_PRECEDENCE: &[&[(&str, &str)]] = &[
    &[("&", "and")],
    &[("+", "plus"), ("-", "minus")],
    &[("*", "mul"), ("/", "div"), ("%", "rem")],
];

pub(crate) fn infix_symbol(operator: &str) -> Option<&'static str> {
    INFIX_PRECEDENCE
        .iter()
        .flat_map(|level| level.iter())
        .find(|(_, name)| *name == operator)
        .map(|(symbol, _)| *symbol)
}

pub(crate) const KEYWORDS: &[&str] = &[
    "package", "import", "as", "default", "not", "some", "null", "true", "false", "set",
];

pub(crate) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !KEYWORDS.contains(&s)
}

fn quote(s: &str) -> String {
    serde_json::Value::String(s.to_owned()).to_string()
}

fn write_joined<T: fmt::Display>(f: &mut fmt::Formatter<'_>, items: &[T], sep: &str) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.package)?;
        if !self.imports.is_empty() {
            writeln!(f)?;
            for import in &self.imports {
                writeln!(f, "{import}")?;
            }
        }
        for rule in &self.rules {
            writeln!(f)?;
            writeln!(f, "{rule}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "package {}", self.path.join("."))
    }
}

impl fmt::Display for Import {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "import {}", self.path.join("."))?;
        if let Some(alias) = &self.alias {
            write!(f, " as {alias}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Head {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;
        if let Some(key) = &self.key {
            write!(f, "[{key}]")?;
        }
        if let Some(value) = &self.value {
            let op = if self.assign { ":=" } else { "=" };
            write!(f, " {op} {value}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.default {
            f.write_str("default ")?;
        }
        write!(f, "{}", self.head)?;
        if self.body.is_empty() {
            return Ok(());
        }
        writeln!(f, " {{")?;
        for expr in &self.body {
            writeln!(f, "\t{expr}")?;
        }
        f.write_str("}")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ExprKind::Term(t) => write!(f, "{t}"),
            ExprKind::Unify(a, b) => write!(f, "{a} = {b}"),
            ExprKind::Assign(a, b) => write!(f, "{a} := {b}"),
            ExprKind::Compare { op, lhs, rhs } => write!(f, "{lhs} {} {rhs}", op.symbol()),
            ExprKind::Not(inner) => write!(f, "not {inner}"),
            ExprKind::Some(vars) => write!(f, "some {}", vars.join(", ")),
        }
    }
}

fn is_infix(term: &Term) -> bool {
    matches!(&term.kind, TermKind::Call { operator, args } if args.len() == 2 && infix_symbol(operator).is_some())
}

fn write_operand(f: &mut fmt::Formatter<'_>, term: &Term) -> fmt::Result {
    if is_infix(term) {
        write!(f, "({term})")
    } else {
        write!(f, "{term}")
    }
}

fn write_body(f: &mut fmt::Formatter<'_>, body: &[Expr]) -> fmt::Result {
    write_joined(f, body, "; ")
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TermKind::Null => f.write_str("null"),
            TermKind::Boolean(b) => write!(f, "{b}"),
            TermKind::Number(n) => write!(f, "{n}"),
            TermKind::String(s) => f.write_str(&quote(s)),
            TermKind::Var(name) => f.write_str(name),
            TermKind::Ref(segments) => {
                let Some((head, rest)) = segments.split_first() else {
                    return Ok(());
                };
                write!(f, "{head}")?;
                for segment in rest {
                    match &segment.kind {
                        TermKind::String(s) if is_identifier(s) => write!(f, ".{s}")?,
                        _ => write!(f, "[{segment}]")?,
                    }
                }
                Ok(())
            }
            TermKind::Array(items) => {
                f.write_str("[")?;
                write_joined(f, items, ", ")?;
                f.write_str("]")
            }
            TermKind::Set(items) => {
                if items.is_empty() {
                    return f.write_str("set()");
                }
                f.write_str("{")?;
                write_joined(f, items, ", ")?;
                f.write_str("}")
            }
            TermKind::Object(pairs) => {
                f.write_str("{")?;
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("}")
            }
            TermKind::Call { operator, args } => {
                if let (Some(symbol), [lhs, rhs]) = (infix_symbol(operator), args.as_slice()) {
                    write_operand(f, lhs)?;
                    write!(f, " {symbol} ")?;
                    return write_operand(f, rhs);
                }
                write!(f, "{operator}(")?;
                write_joined(f, args, ", ")?;
                f.write_str(")")
            }
            TermKind::ArrayComprehension { term, body } => {
                write!(f, "[{term} | ")?;
                write_body(f, body)?;
                f.write_str("]")
            }
            TermKind::SetComprehension { term, body } => {
                write!(f, "{{{term} | ")?;
                write_body(f, body)?;
                f.write_str("}")
            }
            TermKind::ObjectComprehension { key, value, body } => {
                write!(f, "{{{key}: {value} | ")?;
                write_body(f, body)?;
                f.write_str("}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_module;

    #[test]
    fn identifiers() {
        assert!(is_identifier("abc_1"));
        assert!(is_identifier("_x"));
        assert!(!is_identifier("1abc"));
        assert!(!is_identifier("a-b"));
        assert!(!is_identifier("not"));
        assert!(!is_identifier(""));
    }

    #[test]
    fn infix_calls_print_as_operators() {
        let module = parse_module("t", "package p\nr = x { x := (1 + 2) * 3 }").unwrap();
        let printed = module.to_string();
        assert!(printed.contains("x := (1 + 2) * 3"), "{printed}");
    }

    #[test]
    fn refs_use_brackets_for_non_identifier_keys() {
        let module = parse_module("t", "package p\nr = input[\"a b\"].c[0]").unwrap();
        assert!(module.to_string().contains("r = input[\"a b\"].c[0]"));
    }

    #[test]
    fn canonical_form_is_a_fixed_point() {
        let source = r#"package p
import data.lib as l

default allow = false

allow = true {
    some i
    input.roles[i] == "admin"
    count({x | x := l.items[_]}) > 0
}

s[v] { v := [1, "two", null, set(), {"k": -1.5}][_] }
"#;
        let first = parse_module("t", source).unwrap().to_string();
        let second = parse_module("t", &first).unwrap().to_string();
        assert_eq!(first, second);
    }
}
