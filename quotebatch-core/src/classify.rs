//! Failure classification for processing-function errors.
//!
//! Typed errors report their class directly through [`Classify::error_class`].
//! Anything that cannot be typed (strings, boxed errors from arbitrary callers)
//! falls back to case-insensitive phrase matching on the display text.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Retry category of a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Upstream refused for volume reasons; retry with a linear pause.
    RateLimited,
    /// Network hiccup; retry with jittered exponential backoff.
    Transient,
    /// Retrying will not help.
    Permanent,
}

const RATE_LIMIT_PHRASES: &[&str] = &[
    "rate limit",
    "rate-limit",
    "ratelimit",
    "too many requests",
    "429",
    "quota exceeded",
];

const TRANSIENT_PHRASES: &[&str] = &[
    "timeout",
    "timed out",
    "connection",
    "network",
    "temporarily unavailable",
    "502",
    "503",
];

/// Classify an error message by phrase matching. Rate-limit phrases win
/// over transient ones.
pub fn classify_message(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if RATE_LIMIT_PHRASES.iter().any(|p| lower.contains(p)) {
        ErrorClass::RateLimited
    } else if TRANSIENT_PHRASES.iter().any(|p| lower.contains(p)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Permanent
    }
}

/// Errors a processing function may return.
pub trait Classify: fmt::Display {
    /// Typed class, if the error knows it. `None` falls back to text matching.
    fn error_class(&self) -> Option<ErrorClass> {
        None
    }

    fn classify(&self) -> ErrorClass {
        self.error_class()
            .unwrap_or_else(|| classify_message(&self.to_string()))
    }
}

impl Classify for String {}

impl Classify for &str {}

impl Classify for Box<dyn std::error::Error + Send + Sync> {}

impl Classify for std::io::Error {
    fn error_class(&self) -> Option<ErrorClass> {
        use std::io::ErrorKind;
        match self.kind() {
            ErrorKind::TimedOut
            | ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::Interrupted
            | ErrorKind::WouldBlock => Some(ErrorClass::Transient),
            ErrorKind::NotFound | ErrorKind::PermissionDenied | ErrorKind::InvalidInput => {
                Some(ErrorClass::Permanent)
            }
            _ => None,
        }
    }
}

/// Structured errors for quote and reference-data lookups.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out after {elapsed_ms} ms")]
    Timeout { elapsed_ms: u64 },

    #[error("rate limited by provider (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("symbol not found: {symbol}")]
    SymbolNotFound { symbol: String },

    #[error("response format changed: {0}")]
    ResponseFormatChanged(String),

    #[error("fetch error: {0}")]
    Other(String),
}

impl Classify for FetchError {
    fn error_class(&self) -> Option<ErrorClass> {
        match self {
            FetchError::RateLimited { .. } => Some(ErrorClass::RateLimited),
            FetchError::NetworkUnreachable(_) | FetchError::Timeout { .. } => {
                Some(ErrorClass::Transient)
            }
            FetchError::SymbolNotFound { .. } | FetchError::ResponseFormatChanged(_) => {
                Some(ErrorClass::Permanent)
            }
            FetchError::Other(_) => None,
        }
    }
}
