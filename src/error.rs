//! Error types for the AIR compiler driver

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for driver operations
pub type CompileResult<T> = Result<T, CompileError>;

/// Driver errors
///
/// Every variant is fatal: the driver never recovers locally, it reports the
/// failing stage or command and stops.
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Required tool not found on PATH: {tool}")]
    ToolNotFound { tool: String },

    #[error("Malformed module: {message}")]
    Module { message: String },

    #[error("Stage '{stage}' failed: {message}")]
    Stage { stage: String, message: String },

    #[error("Placement error: {message}")]
    Placement { message: String },

    #[error("Error encountered while running: {command} ({status}){}", stderr_suffix(.stderr))]
    ToolFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to launch '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Herd metadata error: {message}")]
    Metadata { message: String },

    #[error("Code generation error: {message}")]
    CodeGen { message: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("\n{}", trimmed)
    }
}

impl CompileError {
    pub fn config(msg: impl Into<String>) -> Self {
        CompileError::Config { message: msg.into() }
    }

    pub fn tool_not_found(tool: impl Into<String>) -> Self {
        CompileError::ToolNotFound { tool: tool.into() }
    }

    pub fn module(msg: impl Into<String>) -> Self {
        CompileError::Module { message: msg.into() }
    }

    pub fn stage(stage: impl Into<String>, msg: impl Into<String>) -> Self {
        CompileError::Stage {
            stage: stage.into(),
            message: msg.into(),
        }
    }

    pub fn placement(msg: impl Into<String>) -> Self {
        CompileError::Placement { message: msg.into() }
    }

    pub fn metadata(msg: impl Into<String>) -> Self {
        CompileError::Metadata { message: msg.into() }
    }

    pub fn codegen(msg: impl Into<String>) -> Self {
        CompileError::CodeGen { message: msg.into() }
    }

    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        CompileError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Short label for the class of failure, used in CLI diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            CompileError::Config { .. } | CompileError::ToolNotFound { .. } => "Configuration error",
            CompileError::Module { .. } | CompileError::Stage { .. } => "Transformation error",
            CompileError::Placement { .. } => "Placement error",
            CompileError::ToolFailed { .. } | CompileError::Spawn { .. } => "Tool error",
            CompileError::Metadata { .. } => "Metadata error",
            CompileError::CodeGen { .. } => "Code generation error",
            CompileError::Io { .. } => "I/O error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_failure_names_command() {
        let err = CompileError::ToolFailed {
            command: "opt -O3 a.ll -o a.opt.bc".to_string(),
            status: "exit status: 1".to_string(),
            stderr: "opt: bad input\n".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.starts_with("Error encountered while running: opt -O3 a.ll -o a.opt.bc"));
        assert!(msg.ends_with("opt: bad input"));
        assert_eq!(err.kind(), "Tool error");
    }

    #[test]
    fn test_empty_stderr_is_omitted() {
        let err = CompileError::ToolFailed {
            command: "llvm-ar rc x.a".to_string(),
            status: "exit status: 2".to_string(),
            stderr: "  \n".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Error encountered while running: llvm-ar rc x.a (exit status: 2)"
        );
    }
}
