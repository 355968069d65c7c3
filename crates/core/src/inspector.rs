//! Static inspection of submission source text.

use crate::domain::{MatchRule, Requirement, SourceText, Submission};
use crate::error::{CoreError, Result};

/// Answers token-presence questions about one submission's source.
///
/// Matching is case-sensitive and ignores whitespace on both sides, so
/// `import  socket` satisfies the token `import socket` and `{ }` satisfies
/// `{}`.
#[derive(Debug, Clone)]
pub struct SourceInspector {
    normalized: String,
}

impl SourceInspector {
    /// Build an inspector over already-read source text.
    ///
    /// Empty (or whitespace-only) text is reported as unreadable rather than
    /// as a missing requirement.
    pub fn new(source: &str) -> Result<Self> {
        let normalized = strip_whitespace(source);
        if normalized.is_empty() {
            return Err(CoreError::UnreadableSource("source is empty".to_string()));
        }
        Ok(Self { normalized })
    }

    pub fn for_submission(submission: &Submission) -> Result<Self> {
        match &submission.source {
            SourceText::Readable(text) => Self::new(text),
            SourceText::Unreadable(reason) => Err(CoreError::UnreadableSource(reason.clone())),
        }
    }

    pub fn satisfies(&self, requirement: &Requirement) -> bool {
        let mut tokens = requirement
            .tokens
            .iter()
            .map(|t| strip_whitespace(t))
            .filter(|t| !t.is_empty())
            .peekable();

        if tokens.peek().is_none() {
            return false;
        }

        match requirement.rule {
            MatchRule::AnyOf => tokens.any(|t| self.normalized.contains(&t)),
            MatchRule::AllOf => tokens.all(|t| self.normalized.contains(&t)),
        }
    }

    /// Index of the first requirement not satisfied, if any.
    pub fn first_unmet(&self, requirements: &[Requirement]) -> Option<usize> {
        requirements.iter().position(|r| !self.satisfies(r))
    }
}

/// Free-function form of [`SourceInspector::satisfies`]. Never panics;
/// empty text fails every requirement.
pub fn satisfies(source: &str, requirement: &Requirement) -> bool {
    SourceInspector::new(source)
        .map(|inspector| inspector.satisfies(requirement))
        .unwrap_or(false)
}

fn strip_whitespace(text: &str) -> String {
    text.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn any_of(tokens: &[&str]) -> Requirement {
        Requirement::any_of("test", tokens)
    }

    fn all_of(tokens: &[&str]) -> Requirement {
        Requirement::all_of("test", tokens)
    }

    #[test]
    fn test_any_of_matches_single_token() {
        let source = "from socket import socket\n";
        assert!(satisfies(source, &any_of(&["import socket", "from socket"])));
        assert!(!satisfies(source, &any_of(&["import asyncio"])));
    }

    #[test]
    fn test_all_of_requires_every_token() {
        let source = "server.bind(('localhost', 6379))";
        assert!(satisfies(source, &all_of(&["bind", "6379"])));
        assert!(!satisfies("server.bind(('localhost', 8080))", &all_of(&["bind", "6379"])));
    }

    #[test]
    fn test_matching_is_case_sensitive() {
        assert!(!satisfies("if cmd == 'Set':", &any_of(&["SET", "set"])));
        assert!(satisfies("if cmd == 'SET':", &any_of(&["SET", "set"])));
    }

    #[test]
    fn test_matching_ignores_whitespace() {
        assert!(satisfies("import   socket", &any_of(&["import socket"])));
        assert!(satisfies("store = { }", &any_of(&["{}"])));
        assert!(satisfies("store={}", &any_of(&["store = {}"])));
    }

    #[test]
    fn test_literal_escape_sequence_token() {
        let source = r#"lines = data.decode().split("\r\n")"#;
        assert!(satisfies(source, &any_of(&[r"\r\n"])));
        assert!(!satisfies("lines = data", &any_of(&[r"\r\n"])));
    }

    #[test]
    fn test_empty_source_is_unreadable() {
        let err = SourceInspector::new("  \n\t").unwrap_err();
        assert!(matches!(err, CoreError::UnreadableSource(_)));
        assert!(!satisfies("", &any_of(&["bind"])));
    }

    #[test]
    fn test_unreadable_submission() {
        let submission = Submission::unreadable("permission denied", vec!["python".into()]);
        let err = SourceInspector::for_submission(&submission).unwrap_err();
        assert!(err.to_string().contains("permission denied"));
    }

    #[test]
    fn test_requirement_without_tokens_never_matches() {
        assert!(!satisfies("anything", &any_of(&[])));
        assert!(!satisfies("anything", &all_of(&["   "])));
    }

    #[test]
    fn test_first_unmet() {
        let inspector = SourceInspector::new("client.accept()").unwrap();
        let requirements = vec![all_of(&["accept"]), all_of(&["recv"])];
        assert_eq!(inspector.first_unmet(&requirements), Some(1));
        assert_eq!(inspector.first_unmet(&requirements[..1]), None);
    }
}
