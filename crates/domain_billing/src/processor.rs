//! Payment processor
//!
//! The orchestrator of the reconciliation engine. A submission is validated
//! against ownership, amount and idempotency rules, then the commit
//! sequence - payment, ledger transaction, invoice allocation, receipt -
//! runs as a single all-or-nothing unit against the billing ledger.
//! Transient conflicts (a concurrent commit, a collided generated
//! reference) are retried once before surfacing.

use chrono::Utc;
use core_kernel::{Money, TenantId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::access::{AccessGuard, Caller, Role};
use crate::error::BillingError;
use crate::invoice::Invoice;
use crate::ledger::{BillingLedger, LedgerState};
use crate::numbering::{self, PeriodKey, SequenceKind};
use crate::payment::{Payment, PaymentIntent};
use crate::receipt::Receipt;

/// The composed result of an accepted payment submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentOutcome {
    /// The recorded payment
    pub payment: Payment,
    /// The issued receipt
    pub receipt: Receipt,
    /// The invoice after allocation, when one was paid
    pub invoice: Option<Invoice>,
}

/// Where the payment reference came from; decides the collision error
enum ReferenceSource {
    Supplied(String),
    Generated(String),
}

impl ReferenceSource {
    fn value(&self) -> &str {
        match self {
            ReferenceSource::Supplied(r) | ReferenceSource::Generated(r) => r,
        }
    }
}

/// Orchestrates payment submission against the billing ledger
pub struct PaymentProcessor {
    ledger: Arc<BillingLedger>,
    guard: Arc<dyn AccessGuard>,
}

impl PaymentProcessor {
    /// Creates a processor over a shared ledger and access guard
    pub fn new(ledger: Arc<BillingLedger>, guard: Arc<dyn AccessGuard>) -> Self {
        Self { ledger, guard }
    }

    /// Returns the underlying ledger
    pub fn ledger(&self) -> &Arc<BillingLedger> {
        &self.ledger
    }

    /// Validates and atomically records a payment
    ///
    /// Validation sequence: caller scope, invoice ownership, amount
    /// resolution, balance check, reference uniqueness. Each failure
    /// short-circuits with no state committed. On success the payment,
    /// its ledger transaction, the invoice update (if any) and the receipt
    /// are all visible together, or not at all.
    pub fn submit_payment(
        &self,
        caller: &Caller,
        intent: &PaymentIntent,
    ) -> Result<PaymentOutcome, BillingError> {
        self.authorize(caller, intent.tenant_id)?;

        let result = self.ledger.commit_with_retry(|state| {
            // The reference is resolved per attempt, before the commit
            // steps run, so a collided generated reference is replaced on
            // retry instead of failing the submission.
            let reference = match &intent.reference_number {
                Some(supplied) => ReferenceSource::Supplied(supplied.clone()),
                None => ReferenceSource::Generated(numbering::auto_reference(Utc::now())),
            };
            Self::commit_payment(state, caller, intent, &reference)
        });

        match result {
            Ok(outcome) => {
                info!(
                    payment = %outcome.payment.id,
                    reference = %outcome.payment.reference_number,
                    amount = %outcome.payment.amount,
                    tenant = %outcome.payment.tenant_id,
                    "payment committed"
                );
                Ok(outcome)
            }
            Err(err) => {
                debug!(error = %err, tenant = %intent.tenant_id, "payment rejected");
                Err(err)
            }
        }
    }

    // The tenant self-only rule is enforced here unconditionally; wider
    // manager/admin scope is the guard's decision.
    fn authorize(&self, caller: &Caller, tenant_id: TenantId) -> Result<(), BillingError> {
        if caller.role == Role::Tenant {
            if caller.tenant_id != Some(tenant_id) {
                return Err(BillingError::Forbidden(
                    "tenants may only make payments for themselves".to_string(),
                ));
            }
            return Ok(());
        }
        if !self.guard.allows_tenant(caller, tenant_id) {
            return Err(BillingError::Forbidden(
                "caller scope does not cover this tenant".to_string(),
            ));
        }
        Ok(())
    }

    // Runs inside the atomic commit: every read here sees the same state
    // the writes land on, so the balance check cannot go stale.
    fn commit_payment(
        state: &mut LedgerState,
        caller: &Caller,
        intent: &PaymentIntent,
        reference: &ReferenceSource,
    ) -> Result<PaymentOutcome, BillingError> {
        let now = Utc::now();
        let today = now.date_naive();

        let account_id = state
            .account_id_for_tenant(intent.tenant_id)
            .ok_or_else(|| BillingError::not_found("Tenant", intent.tenant_id))?;

        // Invoice ownership
        if let Some(invoice_id) = intent.invoice_id {
            let invoice = state
                .invoices
                .get(&invoice_id)
                .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))?;
            if invoice.tenant_id != intent.tenant_id {
                return Err(BillingError::InvoiceTenantMismatch {
                    invoice_id,
                    tenant_id: intent.tenant_id,
                });
            }
        }

        // Amount resolution
        let amount = match intent.amount {
            Some(amount) => amount,
            None => match intent.invoice_id {
                Some(invoice_id) => state
                    .invoices
                    .get(&invoice_id)
                    .map(Invoice::balance_due)
                    .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))?,
                None => return Err(BillingError::AmountRequired),
            },
        };
        if !amount.is_positive() {
            return Err(BillingError::InvalidAmount(amount.amount()));
        }

        // Balance check, delegated to the invoice ledger
        if let Some(invoice_id) = intent.invoice_id {
            if let Some(invoice) = state.invoices.get(&invoice_id) {
                invoice.ensure_allocatable(amount)?;
            }
        }

        // Reference uniqueness; a supplied duplicate is the caller
        // retrying, a generated duplicate is a collision to regenerate
        if state.payment_refs.contains(reference.value()) {
            return Err(match reference {
                ReferenceSource::Supplied(r) => BillingError::DuplicateReference(r.clone()),
                ReferenceSource::Generated(r) => {
                    BillingError::NumberingConflict(format!("generated reference {r} collided"))
                }
            });
        }

        // (a) Payment record
        let mut payment = Payment::completed(
            intent.tenant_id,
            intent.invoice_id,
            amount,
            intent.method,
            reference.value(),
            Some(caller.user_id),
            intent.notes.clone(),
        );

        // (b) Account credit -> ledger transaction
        let account = state
            .accounts
            .get_mut(&account_id)
            .ok_or_else(|| BillingError::not_found("Account", account_id))?;
        let mut transaction = account
            .credit(
                amount,
                format!("Payment {}", reference.value()),
                Some(caller.user_id),
            )?
            .with_method(intent.method)
            .with_reference(reference.value());
        if let Some(invoice_id) = intent.invoice_id {
            transaction = transaction.for_invoice(invoice_id);
        }

        // (c) Invoice allocation or pure account credit
        let zero = Money::zero(amount.currency());
        let (to_invoice, to_account, invoice_after) = match intent.invoice_id {
            Some(invoice_id) => {
                let invoice = state
                    .invoices
                    .get_mut(&invoice_id)
                    .ok_or_else(|| BillingError::not_found("Invoice", invoice_id))?;
                invoice.allocate_payment(amount, today)?;
                (amount, zero, Some(invoice.clone()))
            }
            None => (zero, amount, None),
        };

        // (d) Receipt with a period-scoped sequential number
        let receipt_number = state
            .counters
            .next_number(SequenceKind::Receipt, PeriodKey::from_date(today));
        let receipt = Receipt {
            id: core_kernel::ReceiptId::new_v7(),
            receipt_number,
            transaction_id: transaction.id,
            payment_id: payment.id,
            tenant_id: intent.tenant_id,
            invoice_id: intent.invoice_id,
            amount,
            amount_allocated_to_invoice: to_invoice,
            amount_to_account: to_account,
            payment_date: today,
            method: intent.method,
            issued_by: Some(caller.user_id),
            notes: intent.notes.clone(),
            created_at: now,
        };

        payment.transaction_id = Some(transaction.id);
        payment.receipt_id = Some(receipt.id);

        state.payment_refs.insert(reference.value().to_string());
        state.payments.insert(payment.id, payment.clone());
        state.transactions.push(transaction);
        state.receipts.insert(receipt.id, receipt.clone());

        Ok(PaymentOutcome {
            payment,
            receipt,
            invoice: invoice_after,
        })
    }
}
