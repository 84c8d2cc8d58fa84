//! Structured diagnostics produced by transpilers.
//!
//! Transpilers report problems through the loader context rather than by
//! formatting strings; this keeps file/line/column attached so the overlay
//! collaborator can surface them against the virtual source file.

use serde::{Deserialize, Serialize};

/// A warning or error recorded during one loader-chain run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranspileDiagnostic {
    pub severity: DiagnosticSeverity,
    pub message: String,
    pub file_name: Option<String>,
    pub line: Option<u32>,
    pub column: Option<u32>,
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
}

impl TranspileDiagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            message: message.into(),
            file_name: None,
            line: None,
            column: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Warning,
            message: message.into(),
            file_name: None,
            line: None,
            column: None,
        }
    }

    pub fn with_file(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn with_location(mut self, line: u32, column: u32) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }
}

impl std::fmt::Display for TranspileDiagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.file_name, self.line) {
            (Some(file), Some(line)) => write!(f, "{} ({}:{})", self.message, file, line),
            (Some(file), None) => write!(f, "{} ({})", self.message, file),
            _ => write!(f, "{}", self.message),
        }
    }
}
