use thiserror::Error;

use crate::codec::{DecodeError, EncodeError};
use crate::equality::ConversionError;
use crate::parse::{ParseError, ParseErrors};
use crate::query::{EvalError, QueryError};
use crate::types::CompileErrors;

/// Unified error type covering every stage from source to query result.
///
/// Returned by convenience methods like
/// [`CompiledSet::from_source()`](crate::CompiledSet::from_source).
#[derive(Debug, Error)]
pub enum RegolithError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    ParseFiles(#[from] ParseErrors),

    #[error(transparent)]
    Compile(#[from] CompileErrors),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
