//! The IR module threaded through the pipeline
//!
//! A `Module` owns its text exclusively. It is deliberately not `Clone`:
//! sibling branches of the pipeline start from `reparse`, which validates a
//! fresh copy, so no stage can observe another branch's result.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::error::{CompileError, CompileResult};
use crate::lexer::{Lexer, Token};
use crate::outline::ModuleOutline;

#[derive(Debug, PartialEq, Eq)]
pub struct Module {
    text: String,
}

impl Module {
    /// Validate module text and take ownership of it
    pub fn parse(text: impl Into<String>) -> CompileResult<Self> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(CompileError::module("module text is empty"));
        }
        check_nesting(&text)?;
        Ok(Self { text })
    }

    /// Read and parse a module file
    pub fn read(path: &Path) -> CompileResult<Self> {
        let text = fs::read_to_string(path).map_err(|e| CompileError::io(path, e))?;
        Self::parse(text).map_err(|e| match e {
            CompileError::Module { message } => {
                CompileError::module(format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    /// An independent copy that shares nothing with `self`
    pub fn reparse(&self) -> CompileResult<Self> {
        Self::parse(self.text.clone())
    }

    /// Serialize the module to `path`
    pub fn write(&self, path: &Path) -> CompileResult<()> {
        fs::write(path, &self.text).map_err(|e| CompileError::io(path, e))
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Inspect top-level symbols
    pub fn outline(&self) -> ModuleOutline {
        ModuleOutline::scan(&self.text)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Braces, parentheses and brackets must nest properly outside strings
fn check_nesting(text: &str) -> CompileResult<()> {
    let mut open: Vec<(Token, usize)> = Vec::new();

    for (token, offset) in Lexer::new(text) {
        let Ok(token) = token else { continue };
        match token {
            Token::LBrace | Token::LParen | Token::LBracket => open.push((token, offset)),
            Token::RBrace | Token::RParen | Token::RBracket => {
                let expected = match token {
                    Token::RBrace => Token::LBrace,
                    Token::RParen => Token::LParen,
                    _ => Token::LBracket,
                };
                match open.pop() {
                    Some((opener, _)) if opener == expected => {}
                    Some((opener, at)) => {
                        return Err(CompileError::module(format!(
                            "'{}' at byte {} does not close '{}' at byte {}",
                            token, offset, opener, at
                        )));
                    }
                    None => {
                        return Err(CompileError::module(format!(
                            "unmatched '{}' at byte {}",
                            token, offset
                        )));
                    }
                }
            }
            _ => {}
        }
    }

    match open.pop() {
        Some((opener, at)) => Err(CompileError::module(format!(
            "'{}' at byte {} is never closed",
            opener, at
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_module() {
        let module = Module::parse("module {\n  func.func @f() {\n    return\n  }\n}\n").unwrap();
        assert_eq!(module.outline().functions, vec!["f".to_string()]);
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(matches!(Module::parse("  \n"), Err(CompileError::Module { .. })));
    }

    #[test]
    fn test_parse_rejects_unclosed_region() {
        let err = Module::parse("module {\n  func.func @f() {\n}").unwrap_err();
        assert!(err.to_string().contains("never closed"));
    }

    #[test]
    fn test_parse_rejects_mismatched_closer() {
        let err = Module::parse("module { func.func @f( } )").unwrap_err();
        assert!(err.to_string().contains("does not close"));
    }

    #[test]
    fn test_braces_in_strings_do_not_count() {
        assert!(Module::parse(r#"module attributes {note = "}"} { }"#).is_ok());
    }

    #[test]
    fn test_reparse_is_independent() {
        let original = Module::parse("module {}").unwrap();
        let copy = original.reparse().unwrap();
        assert_eq!(copy, original);
        drop(copy);
        assert_eq!(original.text(), "module {}");
    }

    #[test]
    fn test_write_and_read_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("placed.add.mlir");
        Module::parse("module {}").unwrap().write(&path).unwrap();
        assert_eq!(Module::read(&path).unwrap().text(), "module {}");
    }
}
