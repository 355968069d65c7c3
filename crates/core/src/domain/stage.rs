use serde::{Deserialize, Serialize};

use crate::codec;

/// How the tokens of a [`Requirement`] combine.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MatchRule {
    AnyOf,
    AllOf,
}

/// A named static predicate over submission source text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub label: String,
    pub tokens: Vec<String>,
    pub rule: MatchRule,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Requirement {
    pub fn any_of(label: impl Into<String>, tokens: &[&str]) -> Self {
        Self::with_rule(label, tokens, MatchRule::AnyOf)
    }

    pub fn all_of(label: impl Into<String>, tokens: &[&str]) -> Self {
        Self::with_rule(label, tokens, MatchRule::AllOf)
    }

    fn with_rule(label: impl Into<String>, tokens: &[&str], rule: MatchRule) -> Self {
        Self {
            label: label.into(),
            tokens: tokens.iter().map(|t| t.to_string()).collect(),
            rule,
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// What a reply must look like for an exchange to pass.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Expectation {
    /// `+<text>\r\n`
    Status(String),
    /// A bulk string whose payload contains the value.
    BulkString(String),
    /// The null bulk string (or a `nil` token).
    NullBulkString,
    /// Any reply at all; only its arrival is checked.
    AnyReply,
}

impl Expectation {
    pub fn matches(&self, reply: &[u8]) -> bool {
        match self {
            Self::Status(text) => codec::is_simple_status(reply, text),
            Self::BulkString(value) => codec::is_bulk_string(reply, value),
            Self::NullBulkString => codec::is_null_bulk_string(reply),
            Self::AnyReply => true,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Status(text) => format!("simple string '+{}\\r\\n'", text),
            Self::BulkString(value) => {
                format!("bulk string '${}\\r\\n{}\\r\\n'", value.len(), value)
            }
            Self::NullBulkString => "null bulk string '$-1\\r\\n'".to_string(),
            Self::AnyReply => "any reply".to_string(),
        }
    }
}

/// Hints shown when an exchange fails, keyed by how it failed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepHints {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection: Option<String>,
}

/// One request/response round trip.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Exchange {
    pub label: String,
    pub command: Vec<String>,
    pub expect: Expectation,
    #[serde(default)]
    pub hints: StepHints,
}

impl Exchange {
    pub fn new(label: impl Into<String>, command: &[&str], expect: Expectation) -> Self {
        Self {
            label: label.into(),
            command: command.iter().map(|c| c.to_string()).collect(),
            expect,
            hints: StepHints::default(),
        }
    }

    pub fn on_mismatch(mut self, hint: impl Into<String>) -> Self {
        self.hints.mismatch = Some(hint.into());
        self
    }

    pub fn on_timeout(mut self, hint: impl Into<String>) -> Self {
        self.hints.timeout = Some(hint.into());
        self
    }

    pub fn on_connection(mut self, hint: impl Into<String>) -> Self {
        self.hints.connection = Some(hint.into());
        self
    }

    /// The exact bytes sent for this exchange.
    pub fn frame(&self) -> Vec<u8> {
        codec::encode_command(&self.command)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "step")]
pub enum Step {
    Exchange(Exchange),
    /// Short fixed pause between two exchanges.
    Pause,
}

/// A dynamic script run against one fresh server process.
///
/// Non-gating scenarios are advisory: a reply that does not match becomes a
/// note instead of failing the stage. Start, connection and timeout failures
/// still fail it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    pub label: String,
    pub gating: bool,
    pub steps: Vec<Step>,
}

impl Scenario {
    pub fn gating(label: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            label: label.into(),
            gating: true,
            steps,
        }
    }

    pub fn advisory(label: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            label: label.into(),
            gating: false,
            steps,
        }
    }

    pub fn exchanges(&self) -> impl Iterator<Item = &Exchange> {
        self.steps.iter().filter_map(|step| match step {
            Step::Exchange(exchange) => Some(exchange),
            Step::Pause => None,
        })
    }
}

/// One immutable capability level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDefinition {
    pub ordinal: u8,
    pub title: String,
    pub requirements: Vec<Requirement>,
    pub scenarios: Vec<Scenario>,
}

impl StageDefinition {
    pub fn is_structural(&self) -> bool {
        self.scenarios.is_empty()
    }

    /// Labels of every check in evaluation order: static requirements first,
    /// then the exchanges of each scenario.
    pub fn check_labels(&self) -> Vec<&str> {
        self.requirements
            .iter()
            .map(|r| r.label.as_str())
            .chain(
                self.scenarios
                    .iter()
                    .flat_map(|s| s.exchanges().map(|e| e.label.as_str())),
            )
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expectation_matches() {
        assert!(Expectation::Status("PONG".into()).matches(b"+PONG\r\n"));
        assert!(!Expectation::Status("PONG".into()).matches(b"-ERR\r\n"));
        assert!(Expectation::BulkString("hello".into()).matches(b"$5\r\nhello\r\n"));
        assert!(Expectation::NullBulkString.matches(b"$-1\r\n"));
        assert!(Expectation::AnyReply.matches(b"whatever"));
    }

    #[test]
    fn test_expectation_describe() {
        assert_eq!(
            Expectation::BulkString("hello".into()).describe(),
            "bulk string '$5\\r\\nhello\\r\\n'"
        );
    }

    #[test]
    fn test_exchange_frame() {
        let exchange = Exchange::new("echo", &["ECHO", "hello"], Expectation::AnyReply);
        assert_eq!(exchange.frame(), b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n".to_vec());
    }

    #[test]
    fn test_check_labels_order() {
        let stage = StageDefinition {
            ordinal: 9,
            title: "test".into(),
            requirements: vec![Requirement::all_of("has accept", &["accept"])],
            scenarios: vec![Scenario::gating(
                "ping",
                vec![
                    Step::Exchange(Exchange::new("ping", &["PING"], Expectation::AnyReply)),
                    Step::Pause,
                    Step::Exchange(Exchange::new("ping again", &["PING"], Expectation::AnyReply)),
                ],
            )],
        };
        assert_eq!(stage.check_labels(), vec!["has accept", "ping", "ping again"]);
        assert!(!stage.is_structural());
    }
}
