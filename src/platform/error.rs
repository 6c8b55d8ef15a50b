use std::time::Duration;

use super::retry::{RateLimitHint, RateLimitSignal};

/// Whether a platform rate limit applies to the whole bot or one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitScope {
    Global,
    Local,
}

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("rate limited ({scope:?}), retry after {retry_after:?}")]
    RateLimited {
        retry_after: Option<Duration>,
        scope: RateLimitScope,
    },
    #[error("missing permission: {0}")]
    Forbidden(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("transport error: {0}")]
    Transport(String),
}

impl RateLimitSignal for PlatformError {
    fn rate_limit(&self) -> Option<RateLimitHint> {
        match self {
            Self::RateLimited { retry_after, scope } => Some(RateLimitHint {
                retry_after: *retry_after,
                global: *scope == RateLimitScope::Global,
            }),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for PlatformError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}
