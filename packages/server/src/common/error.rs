//! Error taxonomy for the fulfillment core.
//!
//! Expected business outcomes (insufficient stock, illegal transition, rate
//! limiting) are explicit variants so callers can branch on them; only true
//! infrastructure faults carry an underlying error.

use std::time::Duration;

use thiserror::Error;

use super::entity_ids::{GrainId, OrderId};

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Error, Debug)]
pub enum CoreError {
    /// A reservation was denied because the stock on hand could not cover it.
    /// Recoverable; surfaced to the caller as a checkout failure.
    #[error("insufficient stock for grain {grain_id}: requested {requested} kg, available {available} kg")]
    InsufficientStock {
        grain_id: GrainId,
        requested: f64,
        available: f64,
    },

    /// An order transition outside the legal edge set, including a
    /// conditional update that found the order in a different state than
    /// expected. Never silently retried.
    #[error("invalid order transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// Cancellation requested after processing started.
    #[error("order can no longer be cancelled (status: {0})")]
    NotCancellable(String),

    /// Admission rejection; carries a hint for when to retry.
    #[error("rate limited, retry in {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Caller's role does not permit the operation.
    #[error("not authorized: {0}")]
    Unauthorized(String),

    /// The payment collaborator did not confirm this order's payment.
    #[error("payment for order {0} is not verified")]
    PaymentUnverified(OrderId),

    #[error("{0} not found")]
    NotFound(String),

    /// Malformed request payload (empty order, non-positive quantity).
    #[error("invalid request: {0}")]
    Validation(String),

    /// A bounded storage or collaborator call did not complete in time.
    /// The outcome is unknown; callers treat it as a failure and compensate.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// Infrastructure fault from the system of record. Request paths surface
    /// it as a transient failure; background sweeps log and retry next time.
    #[error("storage unavailable: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Self::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn not_cancellable(status: impl ToString) -> Self {
        Self::NotCancellable(status.to_string())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Whether the caller may meaningfully retry the same request later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. } | Self::DeadlineExceeded | Self::Storage(_)
        )
    }
}
