mod error;
mod grammar;
mod parser;

use tracing::{Level, debug, instrument};

use crate::ast::visit::{max_body_depth, max_depth};
use crate::ast::{Expr, MAX_DEPTH, Module};

pub use error::{ParseError, ParseErrors};

/// File name attached to locations inside ad-hoc query text.
pub const QUERY_FILE: &str = "query";

/// Parse one policy module. Every rule of the result is linked to it.
///
/// # Errors
///
/// Returns [`ParseError`] if `source` is not valid policy syntax or nests
/// deeper than [`MAX_DEPTH`].
#[instrument(level = Level::TRACE, skip(source))]
pub fn parse_module(file: &str, source: &str) -> Result<Module, ParseError> {
    let grammar = grammar::Grammar::new(file, source);
    let mut input = source;
    let module = grammar
        .module(&mut input)
        .map_err(|_| grammar.error(input))?;
    if max_depth(&module) > MAX_DEPTH {
        return Err(ParseError::new(grammar::too_deep(), module.package.location.clone()));
    }
    debug!(
        package = %module.package_name(),
        rules = module.rules.len(),
        "parsed module"
    );
    Ok(module)
}

/// Parse query text: one or more expressions separated by `;` or line breaks.
///
/// # Errors
///
/// Returns [`ParseError`] if the text is empty, not a valid query, or nests
/// deeper than [`MAX_DEPTH`].
pub fn parse_query(text: &str) -> Result<Vec<Expr>, ParseError> {
    let grammar = grammar::Grammar::new(QUERY_FILE, text);
    let mut input = text;
    let body = grammar
        .exprs(&mut input, None)
        .map_err(|_| grammar.error(input))?;
    if max_body_depth(&body) > MAX_DEPTH {
        return Err(ParseError::new(grammar::too_deep(), None));
    }
    Ok(body)
}
