//! Parse, compile, serialize and query Rego-style policy modules.
//!
//! ```
//! use regolith::{CompiledSet, query_rule};
//!
//! let compiled = CompiledSet::from_source("p.rego", "package p\nr = x { x := 1 + 2 }").unwrap();
//! let value = query_rule(&compiled, "p", "r", None, None).unwrap();
//! assert_eq!(value.value, regolith::Value::from(3_i64));
//! ```

pub mod ast;
pub mod bridge;
pub mod codec;
mod compile;
pub mod equality;
mod error;
mod evaluate;
pub mod harness;
pub mod parse;
pub mod query;
pub mod types;

pub use ast::Module;
pub use bridge::{SourceError, compile, parse_bytes, parse_file, parse_files};
pub use codec::{DecodeError, EncodeError, Profile};
pub use equality::{ConversionError, equal, normalize};
pub use error::RegolithError;
pub use harness::{Expected, TestCase, TestFailure};
pub use parse::{ParseError, ParseErrors};
pub use query::{EvalError, Query, QueryError, RuleValue, UndefinedError, query, query_rule};
pub use types::{
    CompileError, CompileErrorKind, CompileErrors, CompiledSet, QueryResult, ResultSet, Store, Value,
};
