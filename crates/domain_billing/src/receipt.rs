//! Receipts - proof-of-payment records
//!
//! A receipt links the Payment and the Transaction that produced it, and
//! splits the paid amount between invoice allocation and account credit.
//! The two split fields always sum to the receipt amount.

use chrono::{DateTime, NaiveDate, Utc};
use core_kernel::{InvoiceId, Money, PaymentId, ReceiptId, TenantId, TransactionId, UserId};
use serde::{Deserialize, Serialize};

use crate::transaction::PaymentMethod;

/// Proof of payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Receipt {
    /// Unique identifier
    pub id: ReceiptId,
    /// Period-scoped sequential number (e.g., "RCP-202608-0001")
    pub receipt_number: String,
    /// Ledger entry this receipt documents
    pub transaction_id: TransactionId,
    /// Payment this receipt documents
    pub payment_id: PaymentId,
    /// Tenant the receipt is issued to
    pub tenant_id: TenantId,
    /// Invoice the payment was applied to, if any
    pub invoice_id: Option<InvoiceId>,
    /// Total amount received
    pub amount: Money,
    /// Portion applied to the invoice
    pub amount_allocated_to_invoice: Money,
    /// Portion credited to the account balance
    pub amount_to_account: Money,
    /// Payment date
    pub payment_date: NaiveDate,
    /// Payment method
    pub method: PaymentMethod,
    /// User who issued the receipt
    pub issued_by: Option<UserId>,
    /// Free-text notes
    pub notes: Option<String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
}

impl Receipt {
    /// Returns true if the allocation split sums to the receipt amount
    pub fn split_is_consistent(&self) -> bool {
        match self
            .amount_allocated_to_invoice
            .checked_add(&self.amount_to_account)
        {
            Ok(sum) => sum == self.amount,
            Err(_) => false,
        }
    }
}
