use serde::{Deserialize, Serialize};

/// Source text of a submission, or the reason it could not be read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "state", content = "detail")]
pub enum SourceText {
    Readable(String),
    Unreadable(String),
}

/// A learner submission: its source text plus the command that launches it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub source: SourceText,
    pub command: Vec<String>,
}

impl Submission {
    pub fn new(source: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            source: SourceText::Readable(source.into()),
            command,
        }
    }

    pub fn unreadable(reason: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            source: SourceText::Unreadable(reason.into()),
            command,
        }
    }

    pub fn is_readable(&self) -> bool {
        matches!(self.source, SourceText::Readable(_))
    }

    /// Program name used in log lines.
    pub fn program(&self) -> &str {
        self.command.first().map(String::as_str).unwrap_or("<none>")
    }
}
