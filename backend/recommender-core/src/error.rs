use thiserror::Error;

pub type Result<T> = std::result::Result<T, RecommenderError>;

#[derive(Debug, Error)]
pub enum RecommenderError {
    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Mocked error situation: {0}")]
    Mocked(&'static str),

    #[error("Recommender {algorithm} produced a score of arity {found}, expected {expected}")]
    InconsistentScore {
        algorithm: String,
        expected: usize,
        found: usize,
    },

    /// Failure raised by an external collaborator, passed through untouched.
    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

impl RecommenderError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        RecommenderError::Configuration(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_is_transparent() {
        let err: RecommenderError = anyhow::anyhow!("template store offline").into();
        assert_eq!(err.to_string(), "template store offline");
    }

    #[test]
    fn test_configuration_message() {
        let err = RecommenderError::configuration("user id must not be empty");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: user id must not be empty"
        );
    }
}
