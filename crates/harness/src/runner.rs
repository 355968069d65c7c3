//! Runs stage definitions against a submission.
//!
//! Per stage: static checks first, then for each scenario a fresh server
//! process and one client session. Teardown of both is unconditional, and
//! only harness faults escape as `Err`; every submission defect becomes a
//! failed [`StageOutcome`].

use respcheck_core::{
    codec, Exchange, Failure, FailureKind, RunReport, Scenario, SourceInspector, StageDefinition,
    StageOutcome, Step, Submission,
};
use tracing::{debug, info, warn};

use crate::catalog::StageCatalog;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, ProcessError, Result, SessionError};
use crate::process::{ManagedProcess, Readiness};
use crate::session::ProtocolSession;
use crate::state_machine::{StagePhase, StageTracker};

const UNREADABLE_CHECK: &str = "Submission source is readable";

/// Why a scenario stopped early.
enum ScenarioError {
    /// A submission defect, attributed to the check with this label.
    Check { label: String, failure: Failure },
    Harness(HarnessError),
}

pub struct StageRunner {
    config: HarnessConfig,
    catalog: StageCatalog,
}

impl StageRunner {
    pub fn new(config: HarnessConfig) -> Self {
        let catalog = StageCatalog::new(config.server.port);
        Self { config, catalog }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    /// Run the given stages strictly one after another.
    pub async fn run_stages(&self, submission: &Submission, ordinals: &[u8]) -> Result<RunReport> {
        let mut report = RunReport::new();
        for ordinal in ordinals {
            report.push(self.run_stage(submission, *ordinal).await?);
        }
        Ok(report)
    }

    pub async fn run_stage(&self, submission: &Submission, ordinal: u8) -> Result<StageOutcome> {
        let stage = self.catalog.require(ordinal)?;
        self.run_definition(submission, stage).await
    }

    pub async fn run_definition(
        &self,
        submission: &Submission,
        stage: &StageDefinition,
    ) -> Result<StageOutcome> {
        info!(stage = stage.ordinal, title = %stage.title, "Running stage");

        let mut outcome = StageOutcome::new(stage.ordinal, stage.title.clone());
        let mut tracker = StageTracker::new(stage.ordinal);

        if self.run_static_checks(submission, stage, &mut outcome) {
            for scenario in &stage.scenarios {
                let keep_going = self
                    .run_scenario(submission, scenario, &mut tracker, &mut outcome)
                    .await?;
                if !keep_going {
                    break;
                }
            }
        }

        tracker.advance(StagePhase::Reported)?;
        outcome.finish();

        match outcome.failure.as_ref() {
            None => info!(stage = stage.ordinal, notes = outcome.notes.len(), "Stage passed"),
            Some(failure) => info!(
                stage = stage.ordinal,
                kind = failure.kind.as_str(),
                check = ?outcome.failed_check,
                "Stage failed"
            ),
        }
        Ok(outcome)
    }

    /// Evaluate requirements in order; false at the first unmet one.
    fn run_static_checks(
        &self,
        submission: &Submission,
        stage: &StageDefinition,
        outcome: &mut StageOutcome,
    ) -> bool {
        let inspector = match SourceInspector::for_submission(submission) {
            Ok(inspector) => inspector,
            Err(e) => {
                outcome.record_failure(
                    UNREADABLE_CHECK,
                    Failure::new(FailureKind::UnreadableSubmission, e.to_string()),
                );
                return false;
            }
        };

        for requirement in &stage.requirements {
            if inspector.satisfies(requirement) {
                debug!(stage = stage.ordinal, requirement = %requirement.label, "Requirement met");
                outcome.record_pass(&requirement.label);
            } else {
                debug!(stage = stage.ordinal, requirement = %requirement.label, "Requirement missing");
                outcome.record_failure(
                    &requirement.label,
                    Failure::new(
                        FailureKind::StaticRequirementMissing,
                        format!("Missing requirement: {}", requirement.label),
                    )
                    .with_hint(requirement.hint.clone()),
                );
                return false;
            }
        }
        true
    }

    /// Run one scenario in its own process. Returns whether the stage should
    /// continue with the next scenario.
    async fn run_scenario(
        &self,
        submission: &Submission,
        scenario: &Scenario,
        tracker: &mut StageTracker,
        outcome: &mut StageOutcome,
    ) -> Result<bool> {
        tracker.advance(StagePhase::DynamicSetup)?;
        debug!(scenario = %scenario.label, gating = scenario.gating, "Starting scenario");

        let mut process = ManagedProcess::new(submission.command.clone());
        let mut session: Option<ProtocolSession> = None;

        let started = process.start(&Readiness::from_config(&self.config)).await;
        if let Some(pid) = process.pid() {
            outcome.spawned_pids.push(pid);
        }

        let result = match started {
            Err(e) => Err(start_failure(scenario, e)),
            Ok(_) => {
                tracker.advance(StagePhase::DynamicExchange)?;
                self.exchange(scenario, &mut session, outcome).await
            }
        };

        tracker.advance(StagePhase::Teardown)?;
        if let Some(mut session) = session.take() {
            session.close().await;
        }
        process.stop(self.config.timing.stop_timeout()).await;

        match result {
            Ok(()) => Ok(true),
            Err(ScenarioError::Harness(e)) => Err(e),
            Err(ScenarioError::Check { label, failure }) if is_noted(scenario, &failure) => {
                outcome.record_note(label, advisory_note(&failure));
                Ok(true)
            }
            Err(ScenarioError::Check { label, failure }) => {
                outcome.record_failure(label, failure);
                Ok(false)
            }
        }
    }

    async fn exchange(
        &self,
        scenario: &Scenario,
        session: &mut Option<ProtocolSession>,
        outcome: &mut StageOutcome,
    ) -> std::result::Result<(), ScenarioError> {
        let timing = &self.config.timing;
        let first = first_label(scenario);

        let opened = ProtocolSession::open(
            &self.config.addr(),
            timing.connect_timeout(),
            timing.read_timeout(),
        )
        .await;
        let active = match opened {
            Ok(s) => session.insert(s),
            Err(e) => {
                let hint = scenario.exchanges().next().and_then(|x| x.hints.connection.clone());
                return Err(session_failure(first, e, hint));
            }
        };

        for step in &scenario.steps {
            match step {
                Step::Pause => tokio::time::sleep(timing.command_pause()).await,
                Step::Exchange(exchange) => {
                    run_exchange(active, exchange, timing.max_reply_bytes).await?;
                    outcome.record_pass(&exchange.label);
                }
            }
        }
        Ok(())
    }
}

async fn run_exchange(
    session: &mut ProtocolSession,
    exchange: &Exchange,
    max_reply_bytes: usize,
) -> std::result::Result<(), ScenarioError> {
    let reply = match session.send(&exchange.frame()).await {
        Ok(()) => session.receive_reply(max_reply_bytes).await,
        Err(e) => Err(e),
    };

    let reply = reply.map_err(|e| {
        let hint = match e {
            SessionError::Timeout { .. } => exchange.hints.timeout.clone(),
            _ => exchange.hints.connection.clone(),
        };
        session_failure(exchange.label.clone(), e, hint)
    })?;

    if exchange.expect.matches(&reply) {
        return Ok(());
    }

    let received = codec::render_bytes(&reply);
    Err(ScenarioError::Check {
        label: exchange.label.clone(),
        failure: Failure::new(
            FailureKind::ProtocolMismatch,
            format!("Expected {}, got '{}'", exchange.expect.describe(), received),
        )
        .with_hint(exchange.hints.mismatch.clone())
        .with_received(received),
    })
}

fn first_label(scenario: &Scenario) -> String {
    scenario
        .exchanges()
        .next()
        .map(|e| e.label.clone())
        .unwrap_or_else(|| scenario.label.clone())
}

fn start_failure(scenario: &Scenario, error: ProcessError) -> ScenarioError {
    let message = match &error {
        ProcessError::ExitedEarly { stderr, .. } if !stderr.is_empty() => {
            format!("Server failed to start: {}\n{}", error, stderr)
        }
        _ => format!("Server failed to start: {}", error),
    };
    warn!(scenario = %scenario.label, error = %error, "Submission failed to start");

    ScenarioError::Check {
        label: first_label(scenario),
        failure: Failure::new(FailureKind::ProcessStartFailure, message)
            .with_hint(Some("Make sure your server starts without errors".to_string())),
    }
}

fn session_failure(label: String, error: SessionError, hint: Option<String>) -> ScenarioError {
    let kind = match &error {
        SessionError::Host(_) | SessionError::NotOpen => {
            return ScenarioError::Harness(HarnessError::Internal(error.to_string()));
        }
        SessionError::Timeout { .. } => FailureKind::ProtocolTimeout,
        SessionError::Connect { .. }
        | SessionError::ConnectTimeout { .. }
        | SessionError::Closed
        | SessionError::Io(_) => FailureKind::ConnectionFailure,
    };

    ScenarioError::Check {
        label,
        failure: Failure::new(kind, error.to_string()).with_hint(hint),
    }
}

/// Only a wrong reply in an advisory scenario is forgiven. A server that
/// cannot start, accept or answer there still fails the stage.
fn is_noted(scenario: &Scenario, failure: &Failure) -> bool {
    !scenario.gating && failure.kind == FailureKind::ProtocolMismatch
}

fn advisory_note(failure: &Failure) -> String {
    let mut note = match &failure.hint {
        Some(hint) => format!("Note: {}", hint),
        None => format!("Note: {}", failure.message),
    };
    if let Some(received) = &failure.received {
        note.push_str(&format!(". Your response: '{}'", received));
    }
    note
}

#[cfg(test)]
mod tests {
    use super::*;
    use respcheck_core::CheckStatus;
    use std::time::Duration;

    fn config_for(port: u16, command: &[&str]) -> HarnessConfig {
        let mut config = HarnessConfig::default();
        config.server.port = port;
        config.submission.command = command.iter().map(|c| c.to_string()).collect();
        config.timing.readiness_delay_ms = 100;
        config.timing.read_timeout_ms = 300;
        config.timing.connect_timeout_ms = 300;
        config.timing.stop_timeout_ms = 500;
        config
    }

    fn python_like(port: u16) -> String {
        format!(
            "import socket\nstore = {{}}\nserver.bind(('localhost', {port}))\nserver.listen(1)\n\
             client, _ = server.accept()\ndata = client.recv(1024)\nparts = data.split(\"\\r\\n\")\n\
             if cmd == 'SET': pass\nif cmd == 'GET': pass\n"
        )
    }

    #[tokio::test]
    async fn test_structural_stage_passes_without_spawning() {
        let config = config_for(6379, &["/nonexistent/server"]);
        let runner = StageRunner::new(config.clone());
        let submission = Submission::new(python_like(6379), config.submission.command.clone());

        let outcome = runner.run_stage(&submission, 1).await.unwrap();
        assert!(outcome.is_pass());
        assert_eq!(outcome.checks.len(), 3);
        assert!(outcome.spawned_pids.is_empty());
    }

    #[tokio::test]
    async fn test_unreadable_submission_fails_every_stage() {
        let runner = StageRunner::new(HarnessConfig::default());
        let submission = Submission::unreadable("No such file or directory", vec!["python".into()]);

        for ordinal in 1..=5 {
            let outcome = runner.run_stage(&submission, ordinal).await.unwrap();
            assert_eq!(outcome.failure_kind(), Some(FailureKind::UnreadableSubmission));
            assert_eq!(outcome.failed_check, Some(0));
            assert!(outcome.spawned_pids.is_empty());
        }
    }

    #[tokio::test]
    async fn test_missing_token_stops_before_dynamic_checks() {
        let runner = StageRunner::new(config_for(6379, &["/nonexistent/server"]));
        let source = python_like(6379).replace("recv", "read");
        let submission = Submission::new(source, vec!["/nonexistent/server".into()]);

        let outcome = runner.run_stage(&submission, 2).await.unwrap();
        assert_eq!(outcome.failure_kind(), Some(FailureKind::StaticRequirementMissing));
        assert_eq!(outcome.failed_check, Some(1));
        assert_eq!(outcome.checks[0].status, CheckStatus::Passed);
        assert!(outcome.spawned_pids.is_empty());
        assert!(outcome.failure.unwrap().hint.unwrap().contains("recv"));
    }

    #[tokio::test]
    async fn test_unlaunchable_command_is_start_failure() {
        let command = ["/nonexistent/respcheck-server"];
        let runner = StageRunner::new(config_for(6379, &command));
        let submission = Submission::new(python_like(6379), vec![command[0].to_string()]);

        let outcome = runner.run_stage(&submission, 2).await.unwrap();
        assert_eq!(outcome.failure_kind(), Some(FailureKind::ProcessStartFailure));
        assert_eq!(outcome.failed_check, Some(2));
        assert_eq!(outcome.checks[2].label, "Server responds to PING");
    }

    #[tokio::test]
    async fn test_unknown_stage_is_harness_error() {
        let runner = StageRunner::new(HarnessConfig::default());
        let submission = Submission::new("import socket", vec!["python".into()]);
        let err = runner.run_stage(&submission, 6).await.unwrap_err();
        assert!(matches!(err, HarnessError::Core(_)));
    }

    #[test]
    fn test_advisory_note_includes_response() {
        let failure = Failure::new(FailureKind::ProtocolMismatch, "Expected null")
            .with_hint(Some("For missing keys, Redis returns '$-1\\r\\n'".into()))
            .with_received("$0\\r\\n\\r\\n");
        let note = advisory_note(&failure);
        assert!(note.starts_with("Note: For missing keys"));
        assert!(note.ends_with("Your response: '$0\\r\\n\\r\\n'"));
    }

    #[test]
    fn test_advisory_scenario_forgives_only_mismatch() {
        let advisory = Scenario::advisory("GET missing key", Vec::new());
        let gating = Scenario::gating("PING", Vec::new());
        let mismatch = Failure::new(FailureKind::ProtocolMismatch, "Expected null");

        assert!(is_noted(&advisory, &mismatch));
        assert!(!is_noted(&gating, &mismatch));
        for kind in [
            FailureKind::ProcessStartFailure,
            FailureKind::ConnectionFailure,
            FailureKind::ProtocolTimeout,
        ] {
            assert!(!is_noted(&advisory, &Failure::new(kind, "x")), "{kind:?}");
        }
    }

    #[test]
    fn test_session_failure_classification() {
        let timeout = session_failure(
            "x".into(),
            SessionError::Timeout {
                timeout: Duration::from_millis(5),
            },
            None,
        );
        assert!(matches!(
            timeout,
            ScenarioError::Check { ref failure, .. } if failure.kind == FailureKind::ProtocolTimeout
        ));

        let closed = session_failure("x".into(), SessionError::Closed, None);
        assert!(matches!(
            closed,
            ScenarioError::Check { ref failure, .. } if failure.kind == FailureKind::ConnectionFailure
        ));

        let host = session_failure(
            "x".into(),
            SessionError::Host(std::io::Error::other("EMFILE")),
            None,
        );
        assert!(matches!(host, ScenarioError::Harness(_)));
    }
}
