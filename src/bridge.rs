//! Entry points from raw source to compiled policy.
//!
//! The bridge is pure: it reads files when asked to, and otherwise only
//! transforms its arguments.

use std::collections::BTreeMap;
use std::path::Path;

use thiserror::Error;
use tracing::{Level, debug, instrument};

use crate::ast::Module;
use crate::parse::{ParseError, ParseErrors, parse_module};
use crate::types::{CompileErrors, CompiledSet};

/// Why one source file could not be turned into a [`Module`].
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Parse raw bytes identified by `source_id`.
///
/// # Errors
///
/// Returns [`ParseError`] if the bytes are not UTF-8 or not valid policy
/// syntax.
pub fn parse_bytes(source_id: &str, bytes: &[u8]) -> Result<Module, ParseError> {
    let source = std::str::from_utf8(bytes).map_err(|e| {
        ParseError::new(
            format!("source is not valid UTF-8 (byte {})", e.valid_up_to()),
            None,
        )
    })?;
    parse_module(source_id, source)
}

/// Read and parse one file. The file's path is its source id.
///
/// # Errors
///
/// Returns [`SourceError`] if the file cannot be read or parsed.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Module, SourceError> {
    let path = path.as_ref();
    let bytes = std::fs::read(path)?;
    Ok(parse_bytes(&path.display().to_string(), &bytes)?)
}

/// Parse every file, keyed by path, ready for [`compile`].
///
/// # Errors
///
/// Returns [`ParseErrors`] listing every file that failed, not just the
/// first.
#[instrument(level = Level::TRACE, skip(paths), fields(files = paths.len()))]
pub fn parse_files<P: AsRef<Path>>(paths: &[P]) -> Result<BTreeMap<String, Module>, ParseErrors> {
    let mut modules = BTreeMap::new();
    let mut failures = Vec::new();
    for path in paths {
        let id = path.as_ref().display().to_string();
        match parse_file(path) {
            Ok(module) => {
                modules.insert(id, module);
            }
            Err(err) => failures.push((id, err)),
        }
    }
    if !failures.is_empty() {
        debug!(failed = failures.len(), "some files failed to parse");
        return Err(ParseErrors(failures));
    }
    Ok(modules)
}

/// Compile a module set. Either every module resolves or nothing does.
///
/// # Errors
///
/// Returns [`CompileErrors`] holding every diagnostic found.
pub fn compile(modules: BTreeMap<String, Module>) -> Result<CompiledSet, CompileErrors> {
    crate::compile::compile(modules)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn temp_file(name: &str, contents: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("regolith-bridge-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn bytes_parse_and_link() {
        let module = parse_bytes("m.rego", b"package a.b\nr = 1\n").unwrap();
        assert_eq!(module.package_name(), "a.b");
        assert!(module.is_linked());
    }

    #[test]
    fn invalid_utf8_is_a_parse_error() {
        let err = parse_bytes("m.rego", &[0x70, 0xff, 0xfe]).unwrap_err();
        assert!(err.message().contains("UTF-8"), "{err}");
        assert_eq!(err.location(), None);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = parse_file("/definitely/not/here.rego").unwrap_err();
        assert!(matches!(err, SourceError::Io(_)));
    }

    #[test]
    fn every_failing_file_is_reported() {
        let good = temp_file("good.rego", "package good\nr = 1\n");
        let bad = temp_file("bad.rego", "package\n");
        let missing = good.with_file_name("missing.rego");
        let err = parse_files(&[&good, &bad, &missing]).unwrap_err();
        let failed: Vec<&str> = err.0.iter().map(|(path, _)| path.as_str()).collect();
        assert_eq!(failed.len(), 2);
        assert!(failed[0].ends_with("bad.rego"));
        assert!(failed[1].ends_with("missing.rego"));
        assert!(err.to_string().starts_with("2 file(s) failed to parse"));
    }

    #[test]
    fn parsed_files_compile_together() {
        let lib = temp_file("lib.rego", "package lib\nadmins = {\"ann\"}\n");
        let app = temp_file(
            "app.rego",
            "package app\nimport data.lib\nallow { lib.admins[input.user] }\n",
        );
        let modules = parse_files(&[lib, app]).unwrap();
        let compiled = compile(modules).unwrap();
        assert_eq!(compiled.packages().len(), 2);
    }
}
