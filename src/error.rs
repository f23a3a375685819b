#![forbid(unsafe_code)]

//! Error taxonomy shared by the aggregation layer.
//!
//! Upstream failures are split from caller-facing failures: crawls swallow
//! [`UpstreamError`] into the cache entry, while [`ServiceError`] is what a
//! request handler ultimately sees.

use thiserror::Error;

/// Failure raised by a single call against the upstream platform.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UpstreamError {
    /// Network level problem (DNS, TLS, timeout, connection reset).
    #[error("upstream transport error: {0}")]
    Transport(String),

    /// The upstream answered with a non-success HTTP status.
    #[error("upstream returned HTTP {status}")]
    Status { status: u16 },

    /// The payload could not be decoded or lacked a mandatory node.
    #[error("unexpected upstream payload: {0}")]
    Shape(String),

    /// The upstream explicitly reported the entity as missing.
    #[error("upstream has no entity for {0}")]
    Missing(String),
}

impl UpstreamError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn shape(message: impl Into<String>) -> Self {
        Self::Shape(message.into())
    }
}

/// Failure surfaced to the caller of an aggregation operation.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Identifier resolution failed through every available path.
    #[error("{0} not found")]
    NotFound(String),

    /// The first upstream call failed and nothing was gathered.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Request parameters could not be interpreted.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ServiceError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
