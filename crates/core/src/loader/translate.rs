// crates/core/src/loader/translate.rs

//! Source-to-native translation.
//!
//! Agents ship either as WebAssembly text (`.wat`) or as the native binary
//! format (`.wasm`). Text is translated with the `wat` crate; binaries pass
//! through after a header check.

use std::path::Path;

/// File extension of the native module format.
pub const NATIVE_EXTENSION: &str = "wasm";

const WASM_MAGIC: &[u8; 4] = b"\0asm";

/// How an agent module is written on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceDialect {
    /// WebAssembly text format; needs translation.
    Text,
    /// Already native.
    Binary,
}

impl SourceDialect {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()? {
            "wat" => Some(SourceDialect::Text),
            "wasm" => Some(SourceDialect::Binary),
            _ => None,
        }
    }
}

/// Translate WebAssembly text into a native module.
///
/// Pure: the same source always yields the same bytes.
pub fn translate(source: &str) -> Result<Vec<u8>, wat::Error> {
    wat::parse_str(source)
}

/// Whether `bytes` start with the native module header.
pub fn is_native(bytes: &[u8]) -> bool {
    bytes.starts_with(WASM_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_from_extension() {
        assert_eq!(
            SourceDialect::from_path(Path::new("a/agent.wat")),
            Some(SourceDialect::Text)
        );
        assert_eq!(
            SourceDialect::from_path(Path::new("helper.wasm")),
            Some(SourceDialect::Binary)
        );
        assert_eq!(SourceDialect::from_path(Path::new("notes.md")), None);
        assert_eq!(SourceDialect::from_path(Path::new("Makefile")), None);
    }

    #[test]
    fn translates_text_to_native() {
        let bytes = translate(r#"(module (func (export "default")))"#).unwrap();
        assert!(is_native(&bytes));
        assert_eq!(
            bytes,
            translate(r#"(module (func (export "default")))"#).unwrap()
        );
    }

    #[test]
    fn rejects_invalid_text() {
        let err = translate("(module (func (export \"default\")").unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn native_header_check() {
        assert!(is_native(b"\0asm\x01\0\0\0"));
        assert!(!is_native(b"(module)"));
        assert!(!is_native(b""));
    }
}
