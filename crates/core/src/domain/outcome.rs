use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pass,
    Fail,
}

impl StageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

/// Why a stage failed. Every variant is a submission defect; faults of the
/// harness itself never become a `FailureKind`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnreadableSubmission,
    StaticRequirementMissing,
    ProcessStartFailure,
    ConnectionFailure,
    ProtocolTimeout,
    ProtocolMismatch,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnreadableSubmission => "unreadable_submission",
            Self::StaticRequirementMissing => "static_requirement_missing",
            Self::ProcessStartFailure => "process_start_failure",
            Self::ConnectionFailure => "connection_failure",
            Self::ProtocolTimeout => "protocol_timeout",
            Self::ProtocolMismatch => "protocol_mismatch",
        }
    }

    /// True for failures detected before any process was launched.
    pub fn is_static(&self) -> bool {
        matches!(
            self,
            Self::UnreadableSubmission | Self::StaticRequirementMissing
        )
    }
}

/// A stage failure with everything a presentation layer needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Reply bytes actually received, escaped for display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<String>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            hint: None,
            received: None,
        }
    }

    pub fn with_hint(mut self, hint: Option<String>) -> Self {
        self.hint = hint;
        self
    }

    pub fn with_received(mut self, received: impl Into<String>) -> Self {
        self.received = Some(received.into());
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Passed,
    Failed,
    /// An advisory check that did not hold; recorded, never gating.
    Noted,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckRecord {
    pub label: String,
    pub status: CheckStatus,
}

/// Result of running one stage definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageOutcome {
    pub stage: u8,
    pub title: String,
    pub status: StageStatus,
    /// Index into `checks` of the first failing check.
    pub failed_check: Option<usize>,
    pub failure: Option<Failure>,
    pub checks: Vec<CheckRecord>,
    pub notes: Vec<String>,
    /// Every process launched for this stage, in launch order.
    pub spawned_pids: Vec<u32>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl StageOutcome {
    pub fn new(stage: u8, title: impl Into<String>) -> Self {
        Self {
            stage,
            title: title.into(),
            status: StageStatus::Pass,
            failed_check: None,
            failure: None,
            checks: Vec::new(),
            notes: Vec::new(),
            spawned_pids: Vec::new(),
            started_at: Utc::now(),
            duration_ms: 0,
        }
    }

    pub fn is_pass(&self) -> bool {
        self.status == StageStatus::Pass
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.failure.as_ref().map(|f| f.kind)
    }

    pub fn record_pass(&mut self, label: impl Into<String>) {
        self.checks.push(CheckRecord {
            label: label.into(),
            status: CheckStatus::Passed,
        });
    }

    pub fn record_note(&mut self, label: impl Into<String>, note: impl Into<String>) {
        self.checks.push(CheckRecord {
            label: label.into(),
            status: CheckStatus::Noted,
        });
        self.notes.push(note.into());
    }

    /// Record a failed check and mark the stage failed. Only the first
    /// failure is kept.
    pub fn record_failure(&mut self, label: impl Into<String>, failure: Failure) {
        self.checks.push(CheckRecord {
            label: label.into(),
            status: CheckStatus::Failed,
        });
        if self.failure.is_none() {
            self.failed_check = Some(self.checks.len() - 1);
            self.failure = Some(failure);
        }
        self.status = StageStatus::Fail;
    }

    pub fn finish(&mut self) {
        let elapsed = Utc::now() - self.started_at;
        self.duration_ms = elapsed.num_milliseconds().max(0) as u64;
    }
}

/// Outcomes of one harness invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub stages: Vec<StageOutcome>,
}

impl RunReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            stages: Vec::new(),
        }
    }

    pub fn push(&mut self, outcome: StageOutcome) {
        self.stages.push(outcome);
    }

    /// True iff at least one stage ran and every stage passed.
    pub fn passed(&self) -> bool {
        !self.stages.is_empty() && self.stages.iter().all(StageOutcome::is_pass)
    }

    pub fn first_failure(&self) -> Option<&StageOutcome> {
        self.stages.iter().find(|s| !s.is_pass())
    }
}

impl Default for RunReport {
    fn default() -> Self {
        Self::new()
    }
}
