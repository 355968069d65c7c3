use std::fmt::Write;

use chrono::{DateTime, Utc};
use colored::Colorize;
use harness::StageCatalog;
use respcheck_core::{CheckStatus, RunReport, StageOutcome};
use serde::Serialize;
use uuid::Uuid;

#[derive(Serialize)]
struct JsonReport<'a> {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    passed: bool,
    stages: &'a [StageOutcome],
}

pub fn render_json(report: &RunReport) -> serde_json::Result<String> {
    serde_json::to_string_pretty(&JsonReport {
        run_id: report.run_id,
        started_at: report.started_at,
        passed: report.passed(),
        stages: &report.stages,
    })
}

pub fn render_human(report: &RunReport) -> String {
    let mut out = String::new();
    for outcome in &report.stages {
        render_stage(&mut out, outcome);
    }

    if report.passed() {
        let _ = writeln!(out, "{}", "All tests passed!".green().bold());
    } else {
        let _ = writeln!(out, "{}", "Some tests failed.".red().bold());
    }
    out
}

fn render_stage(out: &mut String, outcome: &StageOutcome) {
    let _ = writeln!(
        out,
        "{}",
        format!("Stage {}: {}", outcome.stage, outcome.title).bold()
    );

    for (index, check) in outcome.checks.iter().enumerate() {
        let verdict = match check.status {
            CheckStatus::Passed => "PASSED".green(),
            CheckStatus::Failed => "FAILED".red(),
            CheckStatus::Noted => "NOTE".yellow(),
        };
        let _ = writeln!(out, "- Test: {}... {}", check.label, verdict);

        if outcome.failed_check == Some(index) {
            if let Some(failure) = &outcome.failure {
                let _ = writeln!(out, "  {}", failure.message);
                if let Some(hint) = &failure.hint {
                    let _ = writeln!(out, "  Hint: {}", hint);
                }
            }
        }
    }

    for note in &outcome.notes {
        let _ = writeln!(out, "  {}", note.yellow());
    }
    let _ = writeln!(out);
}

pub fn render_catalog(catalog: &StageCatalog) -> String {
    let mut out = String::new();
    for stage in catalog.iter() {
        let _ = writeln!(out, "{}", format!("Stage {}: {}", stage.ordinal, stage.title).bold());
        for label in stage.check_labels() {
            let _ = writeln!(out, "  - {}", label);
        }
    }
    out
}
