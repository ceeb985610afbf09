//! JSON encoding of a [`Module`].
//!
//! The document mirrors the AST field for field. Locations and rule links
//! are skipped by the AST's serde attributes, so a decoded module carries no
//! source positions.

use tracing::{Level, debug, instrument};

use super::{DecodeError, EncodeError, check_depth, finish};
use crate::ast::Module;

/// # Errors
///
/// Returns [`EncodeError::TooDeep`] for a tree nested past
/// [`MAX_DEPTH`](crate::ast::MAX_DEPTH), or [`EncodeError::Json`] if
/// serialization fails.
#[instrument(level = Level::TRACE, skip(module), fields(package = %module.package_name()))]
pub fn encode(module: &Module) -> Result<Vec<u8>, EncodeError> {
    check_depth(module)?;
    let bytes = serde_json::to_vec(module)?;
    debug!(bytes = bytes.len(), "encoded portable module");
    Ok(bytes)
}

/// # Errors
///
/// Returns [`DecodeError`] if `bytes` are not a valid module document.
#[instrument(level = Level::TRACE, skip(bytes), fields(bytes = bytes.len()))]
pub fn decode(bytes: &[u8]) -> Result<Module, DecodeError> {
    let module: Module = serde_json::from_slice(bytes)?;
    finish(module)
}
