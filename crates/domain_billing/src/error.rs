//! Billing domain errors
//!
//! Validation errors are terminal and carry the violated invariant (and the
//! authoritative value where it helps the caller correct the request).
//! Transient errors are retried internally before being surfaced.

use core_kernel::{InvoiceId, Money, MoneyError, TenantId};
use rust_decimal::Decimal;
use thiserror::Error;

/// Errors that can occur in the billing domain
#[derive(Debug, Error)]
pub enum BillingError {
    /// Caller is not allowed to act for the requested tenant
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Referenced entity does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Amount is zero or negative
    #[error("Invalid payment amount: {0}")]
    InvalidAmount(Decimal),

    /// No amount was supplied and none could be derived from an invoice
    #[error("Payment amount is required when no invoice is specified")]
    AmountRequired,

    /// Payment would overpay the invoice
    #[error("Payment amount exceeds invoice balance due of {balance_due}")]
    AmountExceedsBalance { balance_due: Money },

    /// Invoice belongs to a different tenant
    #[error("Invoice {invoice_id} does not belong to tenant {tenant_id}")]
    InvoiceTenantMismatch {
        invoice_id: InvoiceId,
        tenant_id: TenantId,
    },

    /// Invoice is cancelled and rejects all allocations
    #[error("Invoice {0} is not payable")]
    InvoiceNotPayable(InvoiceId),

    /// Caller-supplied reference number already exists
    #[error("Reference number already used: {0}")]
    DuplicateReference(String),

    /// Generated reference or sequence number collided; retried internally
    #[error("Numbering conflict: {0}")]
    NumberingConflict(String),

    /// Concurrent commit won the race; retried internally
    #[error("Persistence conflict: store changed during commit")]
    PersistenceConflict,

    /// Transient failures exhausted their retry budget
    #[error("Operation failed after retries; safe to resubmit")]
    RetryableFailure,

    /// Monetary arithmetic error
    #[error("Money error: {0}")]
    Money(#[from] MoneyError),
}

impl BillingError {
    /// Returns true for errors that are retried internally before surfacing
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BillingError::NumberingConflict(_) | BillingError::PersistenceConflict
        )
    }

    pub(crate) fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        BillingError::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}
