use thiserror::Error;

use crate::config::ProviderKind;
use crate::sqlguard::SqlGuardError;

/// Coarse classification of a reasoning-backend failure. The failover layer
/// switches providers on any failure; the kind is carried for logging and for
/// the aggregated message shown when both backends are down.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderFailureKind {
    NotConfigured,
    Auth,
    RateLimited,
    Timeout,
    Malformed,
    Http,
    Network,
    Other,
}

impl ProviderFailureKind {
    /// Heuristic classification from an error message, for transports that
    /// only surface text (quota errors phrased differently per backend).
    pub fn from_message(message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        if lower.contains("429")
            || lower.contains("quota")
            || lower.contains("rate limit")
            || lower.contains("resource exhausted")
        {
            Self::RateLimited
        } else if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout
        } else if lower.contains("401")
            || lower.contains("403")
            || lower.contains("unauthorized")
            || lower.contains("api key")
        {
            Self::Auth
        } else if lower.contains("502") || lower.contains("503") || lower.contains("500") {
            Self::Http
        } else {
            Self::Other
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::Timeout | Self::Http | Self::Network)
    }
}

/// One backend's failure, tagged with the provider that produced it.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{} provider failed ({kind:?}): {message}", .provider.as_str())]
pub struct ProviderFailure {
    pub provider: ProviderKind,
    pub kind: ProviderFailureKind,
    pub message: String,
}

impl ProviderFailure {
    pub fn new(provider: ProviderKind, kind: ProviderFailureKind, message: impl Into<String>) -> Self {
        Self { provider, kind, message: message.into() }
    }

    pub fn not_configured(provider: ProviderKind) -> Self {
        Self::new(
            provider,
            ProviderFailureKind::NotConfigured,
            format!("{} credential is not configured", provider.as_str()),
        )
    }
}

/// Terminal reasoning-layer errors. A single backend failure never escapes
/// the failover layer; only these do.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("both reasoning providers failed ({first}; {second})")]
    Exhausted { first: ProviderFailure, second: ProviderFailure },
    #[error("no reasoning provider credential is configured")]
    NoneConfigured,
}

/// Failure of one capability invocation. Local to the session: it is recorded
/// and surfaced to the next reevaluation, never aborts the run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ExecutionError {
    #[error("unknown capability `{0}`")]
    UnknownCapability(String),
    #[error("capability `{capability}` is missing required argument `{argument}`")]
    MissingArgument { capability: &'static str, argument: &'static str },
    #[error("capability `{capability}` received invalid `{argument}`: {reason}")]
    InvalidArgument { capability: &'static str, argument: &'static str, reason: String },
    #[error("backend returned status {status} for `{capability}`: {detail}")]
    BackendStatus { capability: String, status: u16, detail: String },
    #[error("backend call for `{capability}` timed out")]
    Timeout { capability: String },
    #[error("backend returned a non-JSON payload for `{capability}`: {detail}")]
    MalformedPayload { capability: String, detail: String },
    #[error("network error calling `{capability}`: {detail}")]
    Network { capability: String, detail: String },
    #[error("no data found for `{capability}`: {detail}")]
    NoData { capability: String, detail: String },
    #[error(transparent)]
    SqlRejected(#[from] SqlGuardError),
    #[error("{0}")]
    SqlDisabled(&'static str),
}

/// Rejection of the inbound query before the state machine starts. The only
/// error class that crosses the `run_query` boundary.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("la consulta no puede estar vacía")]
    EmptyQuery,
}
