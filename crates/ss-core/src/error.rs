//! # LifecycleError
//!
//! Centralized error handling for the Second Serve core.
//! One stable variant per failure kind; upstream degradation (geocoder or
//! notifier trouble) is deliberately NOT here: it never aborts a
//! transition and is reported as data on the result instead.

use thiserror::Error;

/// The primary error type for all lifecycle operations.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Resource not found (e.g., Listing, User)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Authorization guard denial (wrong role, not the owner, not the claimant)
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Action not valid for the listing's current status
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Malformed required fields (e.g., missing location on create)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Lost an atomic-update race; the caller may reload and retry
    #[error("conflict: {0}")]
    Conflict(String),

    /// Infrastructure failure in the backing store
    #[error("internal service error: {0}")]
    Internal(String),
}

/// A specialized Result type for Second Serve logic.
pub type Result<T> = std::result::Result<T, LifecycleError>;

impl LifecycleError {
    /// Wraps a store-adapter fault.
    pub fn internal(err: anyhow::Error) -> Self {
        LifecycleError::Internal(err.to_string())
    }
}
