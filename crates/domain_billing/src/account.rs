//! Tenant account ledger
//!
//! Each tenant has exactly one account carrying a signed running balance.
//! A positive balance is credit owed to the tenant (overpayment); a
//! negative balance is debt. The balance changes only by applying a
//! Transaction, and the two must commit together.

use chrono::{DateTime, Utc};
use core_kernel::{AccountId, Currency, Money, TenantId, UserId};
use serde::{Deserialize, Serialize};

use crate::error::BillingError;
use crate::transaction::{Transaction, TransactionKind};

/// A tenant's running account, independent of any single invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantAccount {
    /// Unique identifier
    pub id: AccountId,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Signed running balance; positive = credit owed to the tenant
    pub balance: Money,
    /// When the account was opened
    pub created_at: DateTime<Utc>,
    /// Last balance change
    pub updated_at: DateTime<Utc>,
}

impl TenantAccount {
    /// Opens a new account with a zero balance
    pub fn new(tenant_id: TenantId, currency: Currency) -> Self {
        let now = Utc::now();
        Self {
            id: AccountId::new_v7(),
            tenant_id,
            balance: Money::zero(currency),
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the current balance
    pub fn balance(&self) -> Money {
        self.balance
    }

    /// Credits the account and returns the ledger entry
    ///
    /// Credit is unconditional: amount validation happens upstream in the
    /// payment processor. The balance update and the returned Transaction
    /// must be persisted in the same atomic commit.
    pub fn credit(
        &mut self,
        amount: Money,
        description: impl Into<String>,
        actor: Option<UserId>,
    ) -> Result<Transaction, BillingError> {
        self.apply(TransactionKind::Payment, amount, description, actor)
    }

    /// Debits the account (refunds, adjustments) and returns the entry
    pub fn debit(
        &mut self,
        kind: TransactionKind,
        amount: Money,
        description: impl Into<String>,
        actor: Option<UserId>,
    ) -> Result<Transaction, BillingError> {
        debug_assert!(!kind.is_credit(), "debit called with a crediting kind");
        self.apply(kind, amount, description, actor)
    }

    fn apply(
        &mut self,
        kind: TransactionKind,
        amount: Money,
        description: impl Into<String>,
        actor: Option<UserId>,
    ) -> Result<Transaction, BillingError> {
        let mut txn = Transaction::new(self.id, kind, amount, description);
        if let Some(actor) = actor {
            txn = txn.processed_by(actor);
        }
        self.balance = self.balance.checked_add(&txn.balance_delta())?;
        self.updated_at = Utc::now();
        Ok(txn)
    }
}
