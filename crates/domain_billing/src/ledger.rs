//! Billing ledger store
//!
//! `BillingLedger` owns the shared billing state: tenant accounts,
//! invoices, payments, transactions, receipts and the period-scoped
//! numbering counters. All mutation goes through `try_commit`, which runs
//! the change against a cloned snapshot and installs it only if no other
//! commit landed in between. A failure inside the closure discards the
//! working copy, so a concurrent reader never observes a partial commit
//! sequence, and concurrent writers to the same invoice serialize their
//! balance checks through the version check.

use chrono::NaiveDate;
use core_kernel::{
    AccountId, BillingPeriodId, Currency, InvoiceId, Money, PaymentId, ReceiptId, TenantId,
    TransactionId,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

use crate::account::TenantAccount;
use crate::error::BillingError;
use crate::invoice::{ChargeLine, Invoice};
use crate::numbering::{PeriodKey, SequenceCounters, SequenceKind};
use crate::payment::Payment;
use crate::receipt::Receipt;
use crate::transaction::Transaction;

/// Retries granted to transient commit failures before `RetryableFailure`
pub(crate) const TRANSIENT_RETRY_LIMIT: u32 = 1;

/// The committed billing state; cloned per commit attempt
#[derive(Debug, Clone)]
pub(crate) struct LedgerState {
    pub(crate) version: u64,
    pub(crate) accounts: HashMap<AccountId, TenantAccount>,
    pub(crate) accounts_by_tenant: HashMap<TenantId, AccountId>,
    pub(crate) invoices: HashMap<InvoiceId, Invoice>,
    pub(crate) payments: HashMap<PaymentId, Payment>,
    pub(crate) payment_refs: HashSet<String>,
    pub(crate) transactions: Vec<Transaction>,
    pub(crate) receipts: HashMap<ReceiptId, Receipt>,
    pub(crate) counters: SequenceCounters,
}

impl LedgerState {
    fn new() -> Self {
        Self {
            version: 0,
            accounts: HashMap::new(),
            accounts_by_tenant: HashMap::new(),
            invoices: HashMap::new(),
            payments: HashMap::new(),
            payment_refs: HashSet::new(),
            transactions: Vec::new(),
            receipts: HashMap::new(),
            counters: SequenceCounters::new(),
        }
    }

    pub(crate) fn account_id_for_tenant(&self, tenant_id: TenantId) -> Option<AccountId> {
        self.accounts_by_tenant.get(&tenant_id).copied()
    }
}

/// Shared, versioned store for the billing engine
#[derive(Debug)]
pub struct BillingLedger {
    state: Mutex<LedgerState>,
    currency: Currency,
}

impl BillingLedger {
    /// Creates an empty ledger operating in the given currency
    pub fn new(currency: Currency) -> Self {
        Self {
            state: Mutex::new(LedgerState::new()),
            currency,
        }
    }

    /// Returns the ledger's operating currency
    pub fn currency(&self) -> Currency {
        self.currency
    }

    /// Runs `f` against a snapshot and commits the result atomically
    ///
    /// The closure receives a working clone of the state. If it returns an
    /// error the clone is dropped and nothing is observable. If another
    /// commit installed a new version while `f` ran, the result is
    /// discarded and `PersistenceConflict` is returned for the caller to
    /// retry against fresh state.
    pub(crate) fn try_commit<T>(
        &self,
        f: impl FnOnce(&mut LedgerState) -> Result<T, BillingError>,
    ) -> Result<T, BillingError> {
        let (mut working, base_version) = {
            let state = self.lock();
            (state.clone(), state.version)
        };

        let value = f(&mut working)?;

        let mut state = self.lock();
        if state.version != base_version {
            return Err(BillingError::PersistenceConflict);
        }
        working.version = base_version + 1;
        *state = working;
        Ok(value)
    }

    /// Runs `f` through [`try_commit`](Self::try_commit), retrying
    /// transient failures
    ///
    /// The closure may run more than once and must be safe to re-run
    /// against fresh state. Transient errors (a lost version race, a
    /// collided generated number) are retried up to the bound, then
    /// surfaced as the generic `RetryableFailure`; every other error
    /// passes through unchanged.
    pub(crate) fn commit_with_retry<T>(
        &self,
        mut f: impl FnMut(&mut LedgerState) -> Result<T, BillingError>,
    ) -> Result<T, BillingError> {
        let mut attempts = 0u32;
        loop {
            match self.try_commit(&mut f) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if attempts >= TRANSIENT_RETRY_LIMIT {
                        debug!(error = %err, "transient retries exhausted");
                        return Err(BillingError::RetryableFailure);
                    }
                    attempts += 1;
                    debug!(error = %err, attempt = attempts, "retrying commit");
                }
                Err(err) => return Err(err),
            }
        }
    }

    // Poisoning only happens if a commit closure panicked; the state it saw
    // was a discarded clone, so recovering the guard is sound.
    fn lock(&self) -> MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens an account for a tenant, returning the existing one if present
    pub fn register_tenant(&self, tenant_id: TenantId) -> Result<AccountId, BillingError> {
        let currency = self.currency;
        self.commit_with_retry(|state| {
            if let Some(existing) = state.account_id_for_tenant(tenant_id) {
                return Ok(existing);
            }
            let account = TenantAccount::new(tenant_id, currency);
            let account_id = account.id;
            state.accounts_by_tenant.insert(tenant_id, account_id);
            state.accounts.insert(account_id, account);
            Ok(account_id)
        })
    }

    /// Creates an invoice from charge lines, numbering it atomically
    ///
    /// The invoice number is allocated from the same period-scoped sequence
    /// machinery as receipt numbers, inside the commit.
    pub fn create_invoice(
        &self,
        tenant_id: TenantId,
        billing_period_id: BillingPeriodId,
        due_date: NaiveDate,
        charges: Vec<ChargeLine>,
    ) -> Result<Invoice, BillingError> {
        let currency = self.currency;
        self.commit_with_retry(|state| {
            if state.account_id_for_tenant(tenant_id).is_none() {
                return Err(BillingError::not_found("Tenant", tenant_id));
            }
            let number = state
                .counters
                .next_number(SequenceKind::Invoice, PeriodKey::current());
            let mut invoice =
                Invoice::new(number, tenant_id, billing_period_id, due_date, currency);
            for line in &charges {
                invoice.add_charge(line.clone())?;
            }
            let snapshot = invoice.clone();
            state.invoices.insert(invoice.id, invoice);
            Ok(snapshot)
        })
    }

    /// Cancels an invoice; further payment allocations are rejected
    pub fn cancel_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, BillingError> {
        self.commit_with_retry(|state| {
            let invoice = state
                .invoices
                .get_mut(&invoice_id)
                .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))?;
            invoice.cancel();
            Ok(invoice.clone())
        })
    }

    /// Allocates the next number in `(kind, period)` as its own commit
    ///
    /// External collaborators (e.g., statement generation) use this when a
    /// number is needed outside a payment submission.
    pub fn next_sequence(
        &self,
        kind: SequenceKind,
        period: PeriodKey,
    ) -> Result<String, BillingError> {
        self.commit_with_retry(|state| Ok(state.counters.next_number(kind, period)))
    }

    /// Returns a snapshot of an invoice
    pub fn invoice(&self, invoice_id: InvoiceId) -> Option<Invoice> {
        self.lock().invoices.get(&invoice_id).cloned()
    }

    /// Returns a snapshot of a tenant's account
    pub fn account_for_tenant(&self, tenant_id: TenantId) -> Option<TenantAccount> {
        let state = self.lock();
        let account_id = state.accounts_by_tenant.get(&tenant_id)?;
        state.accounts.get(account_id).cloned()
    }

    /// Returns a tenant's current account balance
    pub fn account_balance(&self, tenant_id: TenantId) -> Option<Money> {
        self.account_for_tenant(tenant_id).map(|a| a.balance())
    }

    /// Returns a snapshot of a payment
    pub fn payment(&self, payment_id: PaymentId) -> Option<Payment> {
        self.lock().payments.get(&payment_id).cloned()
    }

    /// Returns a snapshot of a receipt
    pub fn receipt(&self, receipt_id: ReceiptId) -> Option<Receipt> {
        self.lock().receipts.get(&receipt_id).cloned()
    }

    /// Returns all receipts issued to a tenant
    pub fn receipts_for_tenant(&self, tenant_id: TenantId) -> Vec<Receipt> {
        self.lock()
            .receipts
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .cloned()
            .collect()
    }

    /// Returns the transaction history of an account, oldest first
    pub fn transactions_for_account(&self, account_id: AccountId) -> Vec<Transaction> {
        self.lock()
            .transactions
            .iter()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect()
    }

    /// Looks up a transaction by id
    pub fn transaction(&self, transaction_id: TransactionId) -> Option<Transaction> {
        self.lock()
            .transactions
            .iter()
            .find(|t| t.id == transaction_id)
            .cloned()
    }

    /// Returns true if a payment reference number is already in use
    pub fn reference_exists(&self, reference: &str) -> bool {
        self.lock().payment_refs.contains(reference)
    }

    /// Number of recorded payments
    pub fn payment_count(&self) -> usize {
        self.lock().payments.len()
    }

    /// Number of recorded transactions
    pub fn transaction_count(&self) -> usize {
        self.lock().transactions.len()
    }

    /// Number of issued receipts
    pub fn receipt_count(&self) -> usize {
        self.lock().receipts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Days, Utc};
    use rust_decimal_macros::dec;

    #[test]
    fn test_register_tenant_is_idempotent() {
        let ledger = BillingLedger::new(Currency::USD);
        let tenant_id = TenantId::new();
        let first = ledger.register_tenant(tenant_id).unwrap();
        let second = ledger.register_tenant(tenant_id).unwrap();
        assert_eq!(first, second);
        assert!(ledger.account_balance(tenant_id).unwrap().is_zero());
    }

    #[test]
    fn test_create_invoice_requires_known_tenant() {
        let ledger = BillingLedger::new(Currency::USD);
        let result = ledger.create_invoice(
            TenantId::new(),
            BillingPeriodId::new(),
            Utc::now().date_naive() + Days::new(14),
            vec![],
        );
        assert!(matches!(result, Err(BillingError::NotFound { .. })));
    }

    #[test]
    fn test_create_invoice_numbers_sequentially() {
        let ledger = BillingLedger::new(Currency::USD);
        let tenant_id = TenantId::new();
        ledger.register_tenant(tenant_id).unwrap();
        let due = Utc::now().date_naive() + Days::new(14);
        let charge = || {
            vec![ChargeLine::new(
                "Monthly Rent",
                Money::new(dec!(1200.00), Currency::USD),
            )]
        };

        let first = ledger
            .create_invoice(tenant_id, BillingPeriodId::new(), due, charge())
            .unwrap();
        let second = ledger
            .create_invoice(tenant_id, BillingPeriodId::new(), due, charge())
            .unwrap();

        assert!(first.invoice_number.ends_with("-0001"));
        assert!(second.invoice_number.ends_with("-0002"));
        assert_eq!(first.total_amount.amount(), dec!(1200.00));
    }

    #[test]
    fn test_commit_with_retry_recovers_from_one_transient_failure() {
        let ledger = BillingLedger::new(Currency::USD);
        let mut calls = 0u32;
        let result = ledger.commit_with_retry(|_state| {
            calls += 1;
            if calls == 1 {
                Err(BillingError::NumberingConflict("collided".to_string()))
            } else {
                Ok(calls)
            }
        });
        assert_eq!(result.unwrap(), 2);
    }

    #[test]
    fn test_commit_with_retry_surfaces_retryable_failure_when_exhausted() {
        let ledger = BillingLedger::new(Currency::USD);
        let mut calls = 0u32;
        let result: Result<(), BillingError> = ledger.commit_with_retry(|_state| {
            calls += 1;
            Err(BillingError::PersistenceConflict)
        });
        assert!(matches!(result, Err(BillingError::RetryableFailure)));
        assert_eq!(calls, 1 + TRANSIENT_RETRY_LIMIT);
    }

    #[test]
    fn test_commit_with_retry_passes_terminal_errors_through() {
        let ledger = BillingLedger::new(Currency::USD);
        let mut calls = 0u32;
        let result: Result<(), BillingError> = ledger.commit_with_retry(|_state| {
            calls += 1;
            Err(BillingError::AmountRequired)
        });
        assert!(matches!(result, Err(BillingError::AmountRequired)));
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_failed_commit_leaves_state_untouched() {
        let ledger = BillingLedger::new(Currency::USD);
        let tenant_id = TenantId::new();
        ledger.register_tenant(tenant_id).unwrap();

        let result: Result<(), BillingError> = ledger.try_commit(|state| {
            // Mutate the working copy, then fail
            state.counters.next_number(SequenceKind::Receipt, PeriodKey::current());
            state.payment_refs.insert("AUTO-X".to_string());
            Err(BillingError::AmountRequired)
        });

        assert!(matches!(result, Err(BillingError::AmountRequired)));
        assert!(!ledger.reference_exists("AUTO-X"));
        let next = ledger
            .next_sequence(SequenceKind::Receipt, PeriodKey::current())
            .unwrap();
        assert!(next.ends_with("-0001"));
    }
}
