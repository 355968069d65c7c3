//! Stage runner for RESP server submissions.
//!
//! Spawns the submission, speaks to it over TCP and folds everything that
//! happens into [`respcheck_core::StageOutcome`] values.

pub mod catalog;
pub mod config;
pub mod error;
pub mod process;
pub mod runner;
pub mod session;
pub mod state_machine;

use std::path::Path;

use respcheck_core::Submission;
use tracing::debug;

pub use catalog::{StageCatalog, STAGE_COUNT};
pub use config::{HarnessConfig, ReadinessMode};
pub use error::{HarnessError, ProcessError, Result, SessionError};
pub use process::{ManagedProcess, ProcessState, Readiness};
pub use runner::StageRunner;
pub use session::ProtocolSession;
pub use state_machine::{StagePhase, StageStateMachine};

#[cfg(unix)]
pub use process::is_process_alive;

/// Read the submission's source. An unreadable or empty file is recorded on
/// the submission rather than returned as an error, so every stage can fail
/// with the same diagnosis.
pub async fn load_submission(source: &Path, command: Vec<String>) -> Submission {
    match tokio::fs::read_to_string(source).await {
        Ok(text) if text.trim().is_empty() => {
            Submission::unreadable(format!("{} is empty", source.display()), command)
        }
        Ok(text) => Submission::new(text, command),
        Err(e) => {
            debug!(path = %source.display(), error = %e, "Submission source unreadable");
            Submission::unreadable(format!("{}: {}", source.display(), e), command)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_load_submission_reads_source() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.py");
        std::fs::write(&path, "import socket\n").unwrap();

        let submission = load_submission(&path, vec!["python".into()]).await;
        assert!(submission.is_readable());
    }

    #[tokio::test]
    async fn test_load_submission_missing_or_empty() {
        let dir = TempDir::new().unwrap();
        let missing = load_submission(&dir.path().join("nope.py"), vec!["python".into()]).await;
        assert!(!missing.is_readable());

        let empty = dir.path().join("empty.py");
        std::fs::write(&empty, "  \n").unwrap();
        let empty = load_submission(&empty, vec!["python".into()]).await;
        assert!(!empty.is_readable());
    }
}
