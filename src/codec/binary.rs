//! Full-fidelity binary encoding of a [`Module`].
//!
//! The blob is a 32-byte fixed header followed by a bincode payload. Unlike
//! the portable profile, every source location survives the round trip.
//!
//! ## Wire Format
//!
//! ```text
//! Offset  Size  Field
//! 0       4     Magic bytes: b"RGMC"
//! 4       2     Format version (u16, little-endian)
//! 6       2     Engine version (u16, little-endian)
//! 8       4     Flags (u32, reserved)
//! 12      4     Payload length in bytes (u32, little-endian)
//! 16      16    BLAKE3 hash of the payload (truncated to 16 bytes)
//! 32..    var   Bincode-encoded payload
//! ```
//!
//! ## Node table
//!
//! The payload is a flat table: every expression and term is one row of
//! [`NodeModule::exprs`] or [`NodeModule::terms`], and a node names its
//! children by row index. Nothing in the payload nests, so decoding it never
//! recurses. Rebuilding the tree follows the indices with a depth budget of
//! [`MAX_DEPTH`]; each row may be used once, which rules out cycles and
//! shared subtrees.
//!
//! The rule-to-module link has no column: encoding reads the live tree
//! through a shared borrow and never touches it.
//!
//! ## Versioning
//!
//! The format version in the header must match exactly. The engine version
//! is informational only.

use serde::{Deserialize, Serialize};
use tracing::{Level, debug, instrument};

use super::{DecodeError, EncodeError, check_depth, finish};
use crate::ast::{
    CompareOp, Expr, ExprKind, Head, Import, Location, MAX_DEPTH, Module, Package, Rule, Term,
    TermKind,
};
use crate::types::Number;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const MAGIC: &[u8; 4] = b"RGMC";
const FORMAT_VERSION: u16 = 2;
const ENGINE_VERSION: u16 = 1;
const HEADER_SIZE: usize = 32;

// ---------------------------------------------------------------------------
// Node table
// ---------------------------------------------------------------------------

/// Row index into [`NodeModule::exprs`] or [`NodeModule::terms`].
type NodeId = u32;

#[derive(Debug, Serialize, Deserialize)]
struct NodeModule {
    package: Vec<String>,
    package_location: Option<NodeLocation>,
    imports: Vec<NodeImport>,
    rules: Vec<NodeRule>,
    exprs: Vec<NodeExpr>,
    terms: Vec<NodeTerm>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct NodeLocation {
    file: String,
    row: u32,
    col: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeImport {
    path: Vec<String>,
    alias: Option<String>,
    location: Option<NodeLocation>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeRule {
    default: bool,
    name: String,
    key: Option<NodeId>,
    value: Option<NodeId>,
    assign: bool,
    body: Vec<NodeId>,
    location: Option<NodeLocation>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeExpr {
    kind: NodeExprKind,
    location: Option<NodeLocation>,
}

#[derive(Debug, Serialize, Deserialize)]
enum NodeExprKind {
    Term(NodeId),
    Unify(NodeId, NodeId),
    Assign(NodeId, NodeId),
    Compare {
        op: NodeCompareOp,
        lhs: NodeId,
        rhs: NodeId,
    },
    /// Row in the expression table.
    Not(NodeId),
    Some(Vec<String>),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
enum NodeCompareOp {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Serialize, Deserialize)]
struct NodeTerm {
    kind: NodeTermKind,
    location: Option<NodeLocation>,
}

#[derive(Debug, Serialize, Deserialize)]
enum NodeTermKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Var(String),
    Ref(Vec<NodeId>),
    Array(Vec<NodeId>),
    Object(Vec<(NodeId, NodeId)>),
    Set(Vec<NodeId>),
    Call {
        operator: String,
        args: Vec<NodeId>,
    },
    ArrayComprehension {
        term: NodeId,
        body: Vec<NodeId>,
    },
    SetComprehension {
        term: NodeId,
        body: Vec<NodeId>,
    },
    ObjectComprehension {
        key: NodeId,
        value: NodeId,
        body: Vec<NodeId>,
    },
}

// ---------------------------------------------------------------------------
// CompareOp conversion
// ---------------------------------------------------------------------------

fn to_node_op(op: CompareOp) -> NodeCompareOp {
    match op {
        CompareOp::Eq => NodeCompareOp::Eq,
        CompareOp::Neq => NodeCompareOp::Neq,
        CompareOp::Gt => NodeCompareOp::Gt,
        CompareOp::Gte => NodeCompareOp::Gte,
        CompareOp::Lt => NodeCompareOp::Lt,
        CompareOp::Lte => NodeCompareOp::Lte,
    }
}

fn from_node_op(op: NodeCompareOp) -> CompareOp {
    match op {
        NodeCompareOp::Eq => CompareOp::Eq,
        NodeCompareOp::Neq => CompareOp::Neq,
        NodeCompareOp::Gt => CompareOp::Gt,
        NodeCompareOp::Gte => CompareOp::Gte,
        NodeCompareOp::Lt => CompareOp::Lt,
        NodeCompareOp::Lte => CompareOp::Lte,
    }
}

fn to_node_location(location: Option<&Location>) -> Option<NodeLocation> {
    location.map(|l| NodeLocation {
        file: l.file.clone(),
        row: l.row,
        col: l.col,
    })
}

fn from_node_location(location: Option<NodeLocation>) -> Option<Location> {
    location.map(|l| Location {
        file: l.file,
        row: l.row,
        col: l.col,
    })
}

// ---------------------------------------------------------------------------
// Module -> node table
// ---------------------------------------------------------------------------

/// Appends rows children first, so every node's children have lower ids.
#[derive(Default)]
struct TableWriter {
    exprs: Vec<NodeExpr>,
    terms: Vec<NodeTerm>,
}

fn push_row<T>(rows: &mut Vec<T>, row: T) -> Result<NodeId, EncodeError> {
    let id = NodeId::try_from(rows.len()).map_err(|_| EncodeError::TooLarge(rows.len()))?;
    rows.push(row);
    Ok(id)
}

impl TableWriter {
    fn module(mut self, module: &Module) -> Result<NodeModule, EncodeError> {
        let rules = module
            .rules
            .iter()
            .map(|rule| self.rule(rule))
            .collect::<Result<_, _>>()?;
        Ok(NodeModule {
            package: module.package.path.clone(),
            package_location: to_node_location(module.package.location.as_ref()),
            imports: module
                .imports
                .iter()
                .map(|i| NodeImport {
                    path: i.path.clone(),
                    alias: i.alias.clone(),
                    location: to_node_location(i.location.as_ref()),
                })
                .collect(),
            rules,
            exprs: self.exprs,
            terms: self.terms,
        })
    }

    fn rule(&mut self, rule: &Rule) -> Result<NodeRule, EncodeError> {
        Ok(NodeRule {
            default: rule.default,
            name: rule.head.name.clone(),
            key: rule.head.key.as_ref().map(|t| self.term(t)).transpose()?,
            value: rule.head.value.as_ref().map(|t| self.term(t)).transpose()?,
            assign: rule.head.assign,
            body: self.body(&rule.body)?,
            location: to_node_location(rule.location.as_ref()),
        })
    }

    fn body(&mut self, body: &[Expr]) -> Result<Vec<NodeId>, EncodeError> {
        body.iter().map(|e| self.expr(e)).collect()
    }

    fn expr(&mut self, expr: &Expr) -> Result<NodeId, EncodeError> {
        let kind = match &expr.kind {
            ExprKind::Term(t) => NodeExprKind::Term(self.term(t)?),
            ExprKind::Unify(a, b) => NodeExprKind::Unify(self.term(a)?, self.term(b)?),
            ExprKind::Assign(a, b) => NodeExprKind::Assign(self.term(a)?, self.term(b)?),
            ExprKind::Compare { op, lhs, rhs } => NodeExprKind::Compare {
                op: to_node_op(*op),
                lhs: self.term(lhs)?,
                rhs: self.term(rhs)?,
            },
            ExprKind::Not(inner) => NodeExprKind::Not(self.expr(inner)?),
            ExprKind::Some(vars) => NodeExprKind::Some(vars.clone()),
        };
        let row = NodeExpr {
            kind,
            location: to_node_location(expr.location.as_ref()),
        };
        push_row(&mut self.exprs, row)
    }

    fn terms(&mut self, terms: &[Term]) -> Result<Vec<NodeId>, EncodeError> {
        terms.iter().map(|t| self.term(t)).collect()
    }

    fn term(&mut self, term: &Term) -> Result<NodeId, EncodeError> {
        let kind = match &term.kind {
            TermKind::Null => NodeTermKind::Null,
            TermKind::Boolean(b) => NodeTermKind::Bool(*b),
            TermKind::Number(Number::Int(v)) => NodeTermKind::Int(*v),
            TermKind::Number(Number::Float(v)) => NodeTermKind::Float(*v),
            TermKind::String(s) => NodeTermKind::Str(s.clone()),
            TermKind::Var(v) => NodeTermKind::Var(v.clone()),
            TermKind::Ref(segments) => NodeTermKind::Ref(self.terms(segments)?),
            TermKind::Array(items) => NodeTermKind::Array(self.terms(items)?),
            TermKind::Object(pairs) => NodeTermKind::Object(
                pairs
                    .iter()
                    .map(|(k, v)| Ok((self.term(k)?, self.term(v)?)))
                    .collect::<Result<_, EncodeError>>()?,
            ),
            TermKind::Set(items) => NodeTermKind::Set(self.terms(items)?),
            TermKind::Call { operator, args } => NodeTermKind::Call {
                operator: operator.clone(),
                args: self.terms(args)?,
            },
            TermKind::ArrayComprehension { term, body } => NodeTermKind::ArrayComprehension {
                term: self.term(term)?,
                body: self.body(body)?,
            },
            TermKind::SetComprehension { term, body } => NodeTermKind::SetComprehension {
                term: self.term(term)?,
                body: self.body(body)?,
            },
            TermKind::ObjectComprehension { key, value, body } => NodeTermKind::ObjectComprehension {
                key: self.term(key)?,
                value: self.term(value)?,
                body: self.body(body)?,
            },
        };
        let row = NodeTerm {
            kind,
            location: to_node_location(term.location.as_ref()),
        };
        push_row(&mut self.terms, row)
    }
}

// ---------------------------------------------------------------------------
// Node table -> Module
// ---------------------------------------------------------------------------

/// Rebuilds the tree from the table, taking each row out as it is used.
struct TableReader {
    exprs: Vec<Option<NodeExpr>>,
    terms: Vec<Option<NodeTerm>>,
    depth: usize,
}

fn take_row<T>(rows: &mut [Option<T>], id: NodeId, table: &str) -> Result<T, DecodeError> {
    rows.get_mut(id as usize)
        .and_then(Option::take)
        .ok_or_else(|| DecodeError::Validation(format!("{table} row {id} is missing or used twice")))
}

impl TableReader {
    fn module(node: NodeModule) -> Result<Module, DecodeError> {
        let mut reader = TableReader {
            exprs: node.exprs.into_iter().map(Some).collect(),
            terms: node.terms.into_iter().map(Some).collect(),
            depth: 0,
        };
        let rules = node
            .rules
            .into_iter()
            .map(|rule| reader.rule(rule))
            .collect::<Result<_, _>>()?;
        if reader.exprs.iter().any(Option::is_some) || reader.terms.iter().any(Option::is_some) {
            return Err(DecodeError::Validation("node table has unreferenced rows".into()));
        }
        Ok(Module {
            package: Package {
                path: node.package,
                location: from_node_location(node.package_location),
            },
            imports: node
                .imports
                .into_iter()
                .map(|i| Import {
                    path: i.path,
                    alias: i.alias,
                    location: from_node_location(i.location),
                })
                .collect(),
            rules,
        })
    }

    fn rule(&mut self, node: NodeRule) -> Result<Rule, DecodeError> {
        Ok(Rule {
            default: node.default,
            head: Head {
                name: node.name,
                key: node.key.map(|id| self.term(id)).transpose()?,
                value: node.value.map(|id| self.term(id)).transpose()?,
                assign: node.assign,
            },
            body: self.body(node.body)?,
            location: from_node_location(node.location),
            module: None,
        })
    }

    fn descend(&mut self) -> Result<(), DecodeError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(DecodeError::TooDeep { limit: MAX_DEPTH });
        }
        Ok(())
    }

    fn body(&mut self, ids: Vec<NodeId>) -> Result<Vec<Expr>, DecodeError> {
        ids.into_iter().map(|id| self.expr(id)).collect()
    }

    fn expr(&mut self, id: NodeId) -> Result<Expr, DecodeError> {
        let node = take_row(&mut self.exprs, id, "expression")?;
        self.descend()?;
        let kind = match node.kind {
            NodeExprKind::Term(t) => ExprKind::Term(self.term(t)?),
            NodeExprKind::Unify(a, b) => ExprKind::Unify(self.term(a)?, self.term(b)?),
            NodeExprKind::Assign(a, b) => ExprKind::Assign(self.term(a)?, self.term(b)?),
            NodeExprKind::Compare { op, lhs, rhs } => ExprKind::Compare {
                op: from_node_op(op),
                lhs: self.term(lhs)?,
                rhs: self.term(rhs)?,
            },
            NodeExprKind::Not(inner) => ExprKind::Not(Box::new(self.expr(inner)?)),
            NodeExprKind::Some(vars) => ExprKind::Some(vars),
        };
        self.depth -= 1;
        Ok(Expr {
            kind,
            location: from_node_location(node.location),
        })
    }

    fn terms(&mut self, ids: Vec<NodeId>) -> Result<Vec<Term>, DecodeError> {
        ids.into_iter().map(|id| self.term(id)).collect()
    }

    fn term(&mut self, id: NodeId) -> Result<Term, DecodeError> {
        let node = take_row(&mut self.terms, id, "term")?;
        self.descend()?;
        let kind = match node.kind {
            NodeTermKind::Null => TermKind::Null,
            NodeTermKind::Bool(b) => TermKind::Boolean(b),
            NodeTermKind::Int(v) => TermKind::Number(Number::Int(v)),
            NodeTermKind::Float(v) => TermKind::Number(Number::Float(v)),
            NodeTermKind::Str(s) => TermKind::String(s),
            NodeTermKind::Var(v) => TermKind::Var(v),
            NodeTermKind::Ref(segments) => TermKind::Ref(self.terms(segments)?),
            NodeTermKind::Array(items) => TermKind::Array(self.terms(items)?),
            NodeTermKind::Object(pairs) => TermKind::Object(
                pairs
                    .into_iter()
                    .map(|(k, v)| Ok((self.term(k)?, self.term(v)?)))
                    .collect::<Result<_, DecodeError>>()?,
            ),
            NodeTermKind::Set(items) => TermKind::Set(self.terms(items)?),
            NodeTermKind::Call { operator, args } => TermKind::Call {
                operator,
                args: self.terms(args)?,
            },
            NodeTermKind::ArrayComprehension { term, body } => TermKind::ArrayComprehension {
                term: Box::new(self.term(term)?),
                body: self.body(body)?,
            },
            NodeTermKind::SetComprehension { term, body } => TermKind::SetComprehension {
                term: Box::new(self.term(term)?),
                body: self.body(body)?,
            },
            NodeTermKind::ObjectComprehension { key, value, body } => TermKind::ObjectComprehension {
                key: Box::new(self.term(key)?),
                value: Box::new(self.term(value)?),
                body: self.body(body)?,
            },
        };
        self.depth -= 1;
        Ok(Term {
            kind,
            location: from_node_location(node.location),
        })
    }
}

// ---------------------------------------------------------------------------
// Header I/O
// ---------------------------------------------------------------------------

fn write_header(buf: &mut Vec<u8>, payload: &[u8]) -> Result<(), EncodeError> {
    let payload_len = u32::try_from(payload.len()).map_err(|_| EncodeError::TooLarge(payload.len()))?;
    let hash = blake3::hash(payload);

    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&ENGINE_VERSION.to_le_bytes());
    buf.extend_from_slice(&0u32.to_le_bytes()); // flags (reserved)
    buf.extend_from_slice(&payload_len.to_le_bytes());
    buf.extend_from_slice(&hash.as_bytes()[..16]);
    Ok(())
}

fn read_header(bytes: &[u8]) -> Result<(u16, usize, [u8; 16]), DecodeError> {
    let Some(header) = bytes.get(..HEADER_SIZE) else {
        return Err(DecodeError::LengthMismatch {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        });
    };

    if &header[0..4] != MAGIC {
        return Err(DecodeError::BadMagic);
    }

    let format_version = u16::from_le_bytes([header[4], header[5]]);
    // header[6..8] is the engine version, header[8..12] the reserved flags
    let payload_len = u32::from_le_bytes([header[12], header[13], header[14], header[15]]) as usize;

    let mut hash = [0u8; 16];
    hash.copy_from_slice(&header[16..32]);

    Ok((format_version, payload_len, hash))
}

// ---------------------------------------------------------------------------
// Public encode/decode
// ---------------------------------------------------------------------------

/// # Errors
///
/// Returns [`EncodeError`] if the tree nests past [`MAX_DEPTH`], bincode
/// fails, or the payload exceeds 4 GiB.
#[instrument(level = Level::TRACE, skip(module), fields(package = %module.package_name()))]
pub fn encode(module: &Module) -> Result<Vec<u8>, EncodeError> {
    check_depth(module)?;
    let node = TableWriter::default().module(module)?;
    let payload = bincode::serde::encode_to_vec(&node, bincode::config::standard())?;

    let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
    write_header(&mut buf, &payload)?;
    buf.extend_from_slice(&payload);
    debug!(bytes = buf.len(), "encoded full-fidelity module");
    Ok(buf)
}

/// # Errors
///
/// Returns [`DecodeError`] on a bad header, a checksum mismatch, a truncated
/// or oversized payload, a node table nested past [`MAX_DEPTH`], or a payload
/// that does not describe a valid module.
#[instrument(level = Level::TRACE, skip(bytes), fields(bytes = bytes.len()))]
pub fn decode(bytes: &[u8]) -> Result<Module, DecodeError> {
    let (format_version, payload_len, stored_hash) = read_header(bytes)?;

    if format_version != FORMAT_VERSION {
        return Err(DecodeError::IncompatibleVersion {
            blob: format_version,
            supported: FORMAT_VERSION,
        });
    }

    let payload = &bytes[HEADER_SIZE..];
    if payload.len() != payload_len {
        return Err(DecodeError::LengthMismatch {
            expected: payload_len,
            actual: payload.len(),
        });
    }

    // Integrity check
    if blake3::hash(payload).as_bytes()[..16] != stored_hash {
        return Err(DecodeError::ChecksumMismatch);
    }

    let (node, read): (NodeModule, usize) =
        bincode::serde::decode_from_slice(payload, bincode::config::standard())?;
    if read != payload.len() {
        return Err(DecodeError::LengthMismatch {
            expected: read,
            actual: payload.len(),
        });
    }

    finish(TableReader::module(node)?)
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::visit::count_locations;
    use crate::parse::parse_module;

    const SOURCE: &str = r#"package app.orders
import data.catalog.items as items

default discount = 0

discount = d {
    input.total >= 100
    d := input.total / 10
}

late[id] {
    some id
    order := input.orders[id]
    not order.shipped
}

totals = {k: v | v := sum([p | p := input.orders[k].prices[_]])}
"#;

    fn module() -> Module {
        parse_module("orders.rego", SOURCE).unwrap()
    }

    #[test]
    fn compare_op_round_trip() {
        let ops = [
            CompareOp::Eq,
            CompareOp::Neq,
            CompareOp::Gt,
            CompareOp::Gte,
            CompareOp::Lt,
            CompareOp::Lte,
        ];
        for op in ops {
            assert_eq!(from_node_op(to_node_op(op)), op);
        }
    }

    #[test]
    fn locations_survive() {
        let module = module();
        let decoded = decode(&encode(&module).unwrap()).unwrap();
        assert_eq!(decoded, module);
        assert!(count_locations(&decoded) > 0);
        assert_eq!(count_locations(&decoded), count_locations(&module));
    }

    #[test]
    fn encode_leaves_links_in_place() {
        let module = module();
        let _ = encode(&module).unwrap();
        assert!(module.is_linked());
    }

    #[test]
    fn header_round_trip() {
        let payload = b"test payload data";
        let mut buf = Vec::new();
        write_header(&mut buf, payload).unwrap();
        assert_eq!(buf.len(), HEADER_SIZE);

        let (format_version, payload_len, hash) = read_header(&buf).unwrap();
        assert_eq!(format_version, FORMAT_VERSION);
        assert_eq!(payload_len, payload.len());
        assert_eq!(&hash, &blake3::hash(payload).as_bytes()[..16]);
    }

    #[test]
    fn header_bad_magic() {
        let mut buf = vec![0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(b"BAAD");
        assert!(matches!(read_header(&buf), Err(DecodeError::BadMagic)));
    }

    #[test]
    fn header_too_short() {
        assert!(matches!(
            read_header(&[0u8; 10]),
            Err(DecodeError::LengthMismatch { expected: HEADER_SIZE, actual: 10 })
        ));
    }

    #[test]
    fn version_mismatch_rejected() {
        let mut bytes = encode(&module()).unwrap();
        bytes[4] = 9;
        assert!(matches!(
            decode(&bytes),
            Err(DecodeError::IncompatibleVersion { blob: 9, supported: FORMAT_VERSION })
        ));
    }

    #[test]
    fn corrupted_payload_rejected() {
        let mut bytes = encode(&module()).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(decode(&bytes), Err(DecodeError::ChecksumMismatch)));
    }

    #[test]
    fn truncated_payload_rejected() {
        let bytes = encode(&module()).unwrap();
        for cut in [HEADER_SIZE, HEADER_SIZE + 1, bytes.len() - 1] {
            assert!(
                matches!(decode(&bytes[..cut]), Err(DecodeError::LengthMismatch { .. })),
                "cut at {cut}"
            );
        }
    }

    fn blob(node: &NodeModule) -> Vec<u8> {
        let payload = bincode::serde::encode_to_vec(node, bincode::config::standard()).unwrap();
        let mut bytes = Vec::new();
        write_header(&mut bytes, &payload).unwrap();
        bytes.extend_from_slice(&payload);
        bytes
    }

    fn table(rules: Vec<NodeRule>, terms: Vec<NodeTerm>) -> NodeModule {
        NodeModule {
            package: vec!["p".into()],
            package_location: None,
            imports: Vec::new(),
            rules,
            exprs: Vec::new(),
            terms,
        }
    }

    fn value_rule(name: &str, value: NodeId) -> NodeRule {
        NodeRule {
            default: false,
            name: name.into(),
            key: None,
            value: Some(value),
            assign: false,
            body: Vec::new(),
            location: None,
        }
    }

    fn row(kind: NodeTermKind) -> NodeTerm {
        NodeTerm { kind, location: None }
    }

    #[test]
    fn invalid_tree_behind_valid_header_rejected() {
        let mut node = table(Vec::new(), Vec::new());
        node.package.clear();
        assert!(matches!(decode(&blob(&node)), Err(DecodeError::Validation(_))));
    }

    #[test]
    fn rows_are_written_children_first() {
        let module = parse_module("m", "package p\nr = [[1], 2]\n").unwrap();
        let node = TableWriter::default().module(&module).unwrap();
        assert_eq!(node.terms.len(), 4);
        assert_eq!(node.rules[0].value, Some(3));
        assert!(matches!(&node.terms[3].kind, NodeTermKind::Array(items) if items == &[1, 2]));
    }

    #[test]
    fn deep_chain_is_rejected_without_recursing() {
        let mut terms = vec![row(NodeTermKind::Int(7))];
        for id in 0..200_000 {
            terms.push(row(NodeTermKind::Array(vec![id])));
        }
        let node = table(vec![value_rule("r", 200_000)], terms);
        assert!(matches!(
            decode(&blob(&node)),
            Err(DecodeError::TooDeep { limit: MAX_DEPTH })
        ));

        let mut shallow = vec![row(NodeTermKind::Int(7))];
        for id in 0..3 {
            shallow.push(row(NodeTermKind::Array(vec![id])));
        }
        let decoded = decode(&blob(&table(vec![value_rule("r", 3)], shallow))).unwrap();
        assert_eq!(decoded.rules[0].head.value.as_ref().map(ToString::to_string).as_deref(), Some("[[[7]]]"));
    }

    #[test]
    fn shared_rows_are_rejected() {
        let node = table(
            vec![value_rule("a", 0), value_rule("b", 0)],
            vec![row(NodeTermKind::Int(1))],
        );
        assert!(matches!(decode(&blob(&node)), Err(DecodeError::Validation(_))));
    }

    #[test]
    fn cyclic_rows_are_rejected() {
        let node = table(
            vec![value_rule("r", 0)],
            vec![row(NodeTermKind::Array(vec![1])), row(NodeTermKind::Array(vec![0]))],
        );
        assert!(matches!(decode(&blob(&node)), Err(DecodeError::Validation(_))));
    }

    #[test]
    fn dangling_and_unreferenced_rows_are_rejected() {
        let dangling = table(vec![value_rule("r", 5)], vec![row(NodeTermKind::Null)]);
        let err = decode(&blob(&dangling)).unwrap_err();
        assert_eq!(err.to_string(), "invalid module: term row 5 is missing or used twice");

        let orphan = table(
            vec![value_rule("r", 0)],
            vec![row(NodeTermKind::Null), row(NodeTermKind::Null)],
        );
        let err = decode(&blob(&orphan)).unwrap_err();
        assert_eq!(err.to_string(), "invalid module: node table has unreferenced rows");
    }

    #[test]
    fn over_deep_module_is_not_encoded() {
        let mut term = Term::int(1);
        for _ in 0..MAX_DEPTH {
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
        assert!(matches!(encode(&module), Err(EncodeError::TooDeep { limit: MAX_DEPTH })));
    }
}