use thiserror::Error;

/// Failure of a single fetch attempt against a node or relay.
///
/// Everything except [`FetchError::Validation`] is a transient network
/// condition and makes the resolver move on to its next attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("upstream unreachable: {0}")]
    UpstreamUnreachable(String),

    #[error("upstream timed out")]
    UpstreamTimeout,

    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),
}

impl FetchError {
    pub fn validation(msg: impl Into<String>) -> Self {
        FetchError::Validation(msg.into())
    }

    /// Whether the resolver may try the next attempt after this error.
    pub fn is_fallback_eligible(&self) -> bool {
        !matches!(self, FetchError::Validation(_))
    }

    /// Short label used in log fields and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Validation(_) => "validation",
            FetchError::UpstreamUnreachable(_) => "unreachable",
            FetchError::UpstreamTimeout => "timeout",
            FetchError::UpstreamStatus(_) => "status",
            FetchError::MalformedPayload(_) => "malformed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_validation_blocks_fallback() {
        assert!(!FetchError::validation("bad").is_fallback_eligible());
        assert!(FetchError::UpstreamUnreachable("refused".into()).is_fallback_eligible());
        assert!(FetchError::UpstreamTimeout.is_fallback_eligible());
        assert!(FetchError::UpstreamStatus(500).is_fallback_eligible());
        assert!(FetchError::MalformedPayload("eof".into()).is_fallback_eligible());
    }

    #[test]
    fn kinds_are_distinct() {
        let kinds = [
            FetchError::validation("x").kind(),
            FetchError::UpstreamUnreachable("x".into()).kind(),
            FetchError::UpstreamTimeout.kind(),
            FetchError::UpstreamStatus(404).kind(),
            FetchError::MalformedPayload("x".into()).kind(),
        ];
        for (i, a) in kinds.iter().enumerate() {
            for b in &kinds[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
