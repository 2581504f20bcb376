use thiserror::Error;

/// Error taxonomy for a research run.
///
/// Variants map to how the step executor reacts: transient errors were
/// already retried inside the adapters and surface here as recoverable,
/// contract violations get one stricter re-prompt, fatal errors abort.
#[derive(Error, Debug)]
pub enum DelveError {
    #[error("transient external failure in {service}: {message}")]
    Transient { service: String, message: String },

    #[error("rate limited by {service}, retry after {retry_after_ms}ms")]
    RateLimited {
        service: String,
        retry_after_ms: u64,
    },

    #[error("permanent external failure in {service}: {message}")]
    Permanent { service: String, message: String },

    #[error("unsupported content at {url}: {content_type}")]
    UnsupportedContent { url: String, content_type: String },

    #[error("contract violation from {contract}: {message}")]
    ContractViolation { contract: String, message: String },

    #[error("action '{action}' not in allowed set [{allowed}]")]
    DisallowedAction { action: String, allowed: String },

    #[error("call to {service} timed out after {timeout_ms}ms")]
    Timeout { service: String, timeout_ms: u64 },

    #[error("deadline exceeded for the research run")]
    DeadlineExceeded,

    #[error("token budget exhausted: {used} of {budget}")]
    BudgetExhausted { used: u64, budget: u64 },

    #[error("initialization failure: {0}")]
    Init(String),

    #[error("invariant violation: {0}")]
    Invariant(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl DelveError {
    /// Recoverable errors are absorbed at step granularity: the step is
    /// logged and skipped, the run continues.
    pub fn is_recoverable(&self) -> bool {
        !self.is_fatal()
    }

    /// Fatal errors terminate the run with a diagnostic.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DelveError::Init(_) | DelveError::Invariant(_))
    }

    /// Whether the adapters may retry this failure with backoff.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            DelveError::Transient { .. }
                | DelveError::RateLimited { .. }
                | DelveError::Timeout { .. }
        )
    }

    /// Short taxonomy tag for diagnostics and CLI output.
    pub fn taxonomy_tag(&self) -> &'static str {
        match self {
            DelveError::Transient { .. }
            | DelveError::RateLimited { .. }
            | DelveError::Timeout { .. } => "transient-external",
            DelveError::Permanent { .. } | DelveError::UnsupportedContent { .. } => {
                "permanent-external"
            }
            DelveError::ContractViolation { .. } | DelveError::DisallowedAction { .. } => {
                "contract-violation"
            }
            DelveError::BudgetExhausted { .. } | DelveError::DeadlineExceeded => "budget",
            DelveError::Init(_) | DelveError::Invariant(_) => "fatal",
            _ => "internal",
        }
    }
}

pub type DelveResult<T> = Result<T, DelveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formats() {
        let err = DelveError::Transient {
            service: "search".into(),
            message: "connection reset".into(),
        };
        assert_eq!(
            err.to_string(),
            "transient external failure in search: connection reset"
        );

        let err = DelveError::DisallowedAction {
            action: "search".into(),
            allowed: "answer".into(),
        };
        assert!(err.to_string().contains("not in allowed set"));

        let err = DelveError::BudgetExhausted {
            used: 1_000_001,
            budget: 1_000_000,
        };
        assert!(err.to_string().contains("1000001"));
    }

    #[test]
    fn fatal_classification() {
        assert!(DelveError::Init("missing key".into()).is_fatal());
        assert!(DelveError::Invariant("duplicate url".into()).is_fatal());
        assert!(!DelveError::DeadlineExceeded.is_fatal());
        assert!(DelveError::DeadlineExceeded.is_recoverable());
    }

    #[test]
    fn transient_classification() {
        assert!(DelveError::Timeout {
            service: "reader".into(),
            timeout_ms: 5000
        }
        .is_transient());
        assert!(!DelveError::Permanent {
            service: "llm".into(),
            message: "401".into()
        }
        .is_transient());
    }

    #[test]
    fn taxonomy_tags() {
        assert_eq!(
            DelveError::RateLimited {
                service: "llm".into(),
                retry_after_ms: 100
            }
            .taxonomy_tag(),
            "transient-external"
        );
        assert_eq!(
            DelveError::ContractViolation {
                contract: "llm".into(),
                message: "bad schema".into()
            }
            .taxonomy_tag(),
            "contract-violation"
        );
        assert_eq!(DelveError::Init("x".into()).taxonomy_tag(), "fatal");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DelveError>();
    }

    #[test]
    fn json_error_converts() {
        let json_err = serde_json::from_str::<String>("not json").unwrap_err();
        let err: DelveError = json_err.into();
        assert!(matches!(err, DelveError::Serialization(_)));
    }
}
