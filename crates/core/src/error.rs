use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Stage not found: {0}")]
    StageNotFound(u8),

    #[error("Submission source unreadable: {0}")]
    UnreadableSource(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = CoreError::StageNotFound(9);
        assert!(error.to_string().contains('9'));

        let error = CoreError::UnreadableSource("source is empty".to_string());
        assert_eq!(error.to_string(), "Submission source unreadable: source is empty");
    }
}
