//! Error types for the fan-out client.
//!
//! Errors are split in two levels, mirroring where they are raised:
//!
//! - [`ProviderError`] covers a single HTTP exchange with one upstream:
//!   transport failures, non-2xx statuses, explicit rate limiting, and
//!   responses whose JSON does not match the vendor schema. These are fed
//!   into the balancer's retry and circuit-breaker logic and only surface
//!   to callers once attempts are exhausted.
//! - [`ClientError`] is what callers of the facade see: configuration
//!   problems, an empty selection set, exhausted validation retries,
//!   cancellation, and terminal provider failures carrying the
//!   provider-of-record.

use thiserror::Error;

use crate::models::RequestKind;

/// Errors raised by a provider adapter or the HTTP executor for a single
/// upstream exchange. Adapters never retry; the balancer does.
#[derive(Error, Debug)]
pub enum ProviderError {
    /// DNS, connect, read, or timeout failure at the HTTP layer.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Non-2xx upstream response. The status is carried through so callers
    /// can see the last HTTP status on final failure.
    #[error("upstream returned HTTP {status}: {message}")]
    UpstreamHttp { status: u16, message: String },

    /// Upstream explicitly signalled 429.
    #[error("rate limited by upstream")]
    RateLimited,

    /// 2xx response whose JSON does not match the expected vendor schema.
    #[error("unexpected response shape: {message}")]
    Format { message: String },

    /// The adapter was asked for an operation its family cannot perform.
    /// Selection filters by capability, so this only fires on direct
    /// adapter misuse.
    #[error("unsupported operation: {message}")]
    Unsupported { message: String },
}

impl ProviderError {
    /// The HTTP status associated with this error, when there is one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ProviderError::UpstreamHttp { status, .. } => Some(*status),
            ProviderError::RateLimited => Some(429),
            ProviderError::Transport(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

/// Errors surfaced by the client facade and the load balancer.
#[derive(Error, Debug)]
pub enum ClientError {
    /// Terminal provider failure after all retry attempts were consumed.
    /// `provider` is the instance id of the last provider tried.
    #[error("provider {provider} failed: {source}")]
    Provider {
        provider: String,
        #[source]
        source: ProviderError,
    },

    /// Invalid or missing configuration. Fatal at startup; never retried.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The selection set is empty and the retry policy does not keep
    /// waiting for the health loop to revive an instance.
    #[error("no providers available for {kind} requests")]
    NoProvidersAvailable { kind: RequestKind },

    /// All validator retries were consumed. Carries the last reply text
    /// and the last validation error.
    #[error("validation retries exhausted: {error}")]
    ValidationExhausted { last_reply: String, error: String },

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,
}

impl ClientError {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        ClientError::Config {
            message: message.into(),
        }
    }

    /// The last HTTP status observed before this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Provider { source, .. } => source.status(),
            _ => None,
        }
    }
}

impl From<serde_yaml::Error> for ClientError {
    fn from(err: serde_yaml::Error) -> Self {
        ClientError::Config {
            message: err.to_string(),
        }
    }
}
