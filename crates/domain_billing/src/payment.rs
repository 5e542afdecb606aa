//! Payment records and submission intents

use chrono::{DateTime, NaiveDate, Utc};
use core_kernel::{InvoiceId, Money, PaymentId, ReceiptId, TenantId, TransactionId, UserId};
use serde::{Deserialize, Serialize};

use crate::transaction::PaymentMethod;

/// Payment lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

/// A submitted request to record a payment
///
/// The intent is what the external request layer hands the processor:
/// everything optional here is resolved during validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentIntent {
    /// Tenant the payment is for
    pub tenant_id: TenantId,
    /// Invoice to pay; absent means a pure account credit
    pub invoice_id: Option<InvoiceId>,
    /// Amount; defaults to the invoice's balance due when absent
    pub amount: Option<Money>,
    /// Payment method
    pub method: PaymentMethod,
    /// Caller-supplied reference; generated when absent
    pub reference_number: Option<String>,
    /// Free-text notes
    pub notes: Option<String>,
}

impl PaymentIntent {
    /// Creates an intent with only the required fields
    pub fn new(tenant_id: TenantId, method: PaymentMethod) -> Self {
        Self {
            tenant_id,
            invoice_id: None,
            amount: None,
            method,
            reference_number: None,
            notes: None,
        }
    }

    /// Targets an invoice
    pub fn for_invoice(mut self, invoice_id: InvoiceId) -> Self {
        self.invoice_id = Some(invoice_id);
        self
    }

    /// Sets an explicit amount
    pub fn with_amount(mut self, amount: Money) -> Self {
        self.amount = Some(amount);
        self
    }

    /// Supplies a reference number for idempotent retry detection
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference_number = Some(reference.into());
        self
    }

    /// Attaches notes
    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// An accepted, recorded payment
///
/// Created once per accepted intent and immutable after completion except
/// for refund transitions (handled outside this engine).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    /// Unique identifier
    pub id: PaymentId,
    /// Tenant the payment is for
    pub tenant_id: TenantId,
    /// Invoice paid, if any
    pub invoice_id: Option<InvoiceId>,
    /// Payment amount
    pub amount: Money,
    /// Payment method
    pub method: PaymentMethod,
    /// Unique reference number
    pub reference_number: String,
    /// Status
    pub status: PaymentStatus,
    /// Payment date
    pub payment_date: NaiveDate,
    /// Ledger entry produced by this payment
    pub transaction_id: Option<TransactionId>,
    /// Receipt produced by this payment
    pub receipt_id: Option<ReceiptId>,
    /// User who processed the payment
    pub processed_by: Option<UserId>,
    /// Free-text notes
    pub notes: Option<String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Creates a completed payment record
    pub fn completed(
        tenant_id: TenantId,
        invoice_id: Option<InvoiceId>,
        amount: Money,
        method: PaymentMethod,
        reference_number: impl Into<String>,
        processed_by: Option<UserId>,
        notes: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new_v7(),
            tenant_id,
            invoice_id,
            amount,
            method,
            reference_number: reference_number.into(),
            status: PaymentStatus::Completed,
            payment_date: now.date_naive(),
            transaction_id: None,
            receipt_id: None,
            processed_by,
            notes,
            created_at: now,
        }
    }
}
