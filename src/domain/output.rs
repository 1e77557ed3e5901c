//! Structured output shapes produced by the output formatter.

use serde::{Deserialize, Serialize};

/// Uniform result shape for command output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum FormattedOutput {
    /// Columnar kubectl output
    Table {
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
        total_rows: usize,
    },

    /// Free text, JSON or YAML
    Text {
        content_kind: ContentKind,
        content: String,
        line_count: usize,
    },

    /// `kubectl describe` output split into sections
    Describe { sections: Vec<DescribeSection> },

    /// `kubectl logs` output
    Logs { lines: Vec<String> },

    /// The command failed
    Error {
        message: String,
        return_code: Option<i32>,
    },
}

impl FormattedOutput {
    /// Plain text shape
    pub fn text(content: impl Into<String>) -> Self {
        let content = content.into();
        let line_count = content.lines().count();
        Self::Text {
            content_kind: ContentKind::Text,
            content,
            line_count,
        }
    }

    /// Error shape
    pub fn error(message: impl Into<String>, return_code: Option<i32>) -> Self {
        Self::Error {
            message: message.into(),
            return_code,
        }
    }

    /// Short name of the shape ("table", "text", ...)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Table { .. } => "table",
            Self::Text { .. } => "text",
            Self::Describe { .. } => "describe",
            Self::Logs { .. } => "logs",
            Self::Error { .. } => "error",
        }
    }
}

/// Detected kind of a text payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Text,
    Json,
    Yaml,
}

/// One titled block of `kubectl describe` output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DescribeSection {
    pub title: String,
    pub lines: Vec<String>,
}
