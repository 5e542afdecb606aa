//! Append-only transaction records
//!
//! A Transaction is the audit entry for every balance-affecting event on a
//! tenant account. Transactions are never updated or deleted; corrections
//! are recorded as new entries.

use chrono::{DateTime, Utc};
use core_kernel::{AccountId, InvoiceId, Money, TransactionId, UserId};
use serde::{Deserialize, Serialize};

/// Kind of balance-affecting event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Money received from the tenant; increases the account balance
    Payment,
    /// Money returned to the tenant; decreases the account balance
    Refund,
    /// Manual correction; decreases the account balance
    Adjustment,
}

impl TransactionKind {
    /// Returns true if this kind increases the account balance
    pub fn is_credit(&self) -> bool {
        matches!(self, TransactionKind::Payment)
    }

    /// Returns the amount with the sign this kind applies to a balance
    pub fn signed(&self, amount: Money) -> Money {
        if self.is_credit() {
            amount
        } else {
            -amount
        }
    }
}

/// How a payment was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    BankTransfer,
    Card,
    MobileMoney,
    Check,
    Other,
}

/// An immutable ledger entry for a tenant account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier
    pub id: TransactionId,
    /// Account affected by this entry
    pub account_id: AccountId,
    /// Kind of event
    pub kind: TransactionKind,
    /// Amount (always positive; the kind determines the sign)
    pub amount: Money,
    /// Payment method, when the entry stems from a payment
    pub method: Option<PaymentMethod>,
    /// Invoice this entry relates to, if any
    pub invoice_id: Option<InvoiceId>,
    /// Reference number carried from the originating payment
    pub reference_number: Option<String>,
    /// Human-readable description
    pub description: String,
    /// User who processed the event
    pub processed_by: Option<UserId>,
    /// When the entry was recorded
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Creates a new transaction entry
    pub fn new(
        account_id: AccountId,
        kind: TransactionKind,
        amount: Money,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: TransactionId::new_v7(),
            account_id,
            kind,
            amount,
            method: None,
            invoice_id: None,
            reference_number: None,
            description: description.into(),
            processed_by: None,
            created_at: Utc::now(),
        }
    }

    /// Sets the payment method
    pub fn with_method(mut self, method: PaymentMethod) -> Self {
        self.method = Some(method);
        self
    }

    /// Links the entry to an invoice
    pub fn for_invoice(mut self, invoice_id: InvoiceId) -> Self {
        self.invoice_id = Some(invoice_id);
        self
    }

    /// Carries the originating payment reference
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference_number = Some(reference.into());
        self
    }

    /// Records the processing user
    pub fn processed_by(mut self, actor: UserId) -> Self {
        self.processed_by = Some(actor);
        self
    }

    /// Returns the balance delta this entry applies
    pub fn balance_delta(&self) -> Money {
        self.kind.signed(self.amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_kernel::Currency;
    use rust_decimal_macros::dec;

    #[test]
    fn test_payment_credits_refund_debits() {
        let amount = Money::new(dec!(500.00), Currency::USD);
        assert_eq!(TransactionKind::Payment.signed(amount), amount);
        assert_eq!(TransactionKind::Refund.signed(amount), -amount);
        assert_eq!(TransactionKind::Adjustment.signed(amount), -amount);
    }

    #[test]
    fn test_builder_chain() {
        let account_id = AccountId::new();
        let invoice_id = InvoiceId::new();
        let actor = UserId::new();
        let txn = Transaction::new(
            account_id,
            TransactionKind::Payment,
            Money::new(dec!(100.00), Currency::USD),
            "Payment AUTO-1",
        )
        .with_method(PaymentMethod::BankTransfer)
        .for_invoice(invoice_id)
        .with_reference("AUTO-1")
        .processed_by(actor);

        assert_eq!(txn.method, Some(PaymentMethod::BankTransfer));
        assert_eq!(txn.invoice_id, Some(invoice_id));
        assert_eq!(txn.reference_number.as_deref(), Some("AUTO-1"));
        assert_eq!(txn.processed_by, Some(actor));
    }
}
