//! Invoice ledger
//!
//! An invoice owns its charge lines, totals, paid amount and status. It is
//! mutated only through payment allocation or explicit charge edits, and
//! its status is a pure function of the paid amount, total, due date and
//! cancelled flag.

use chrono::{DateTime, NaiveDate, Utc};
use core_kernel::{BillingPeriodId, Currency, InvoiceId, Money, TenantId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BillingError;

/// Invoice lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    /// Issued, nothing paid, not yet past due
    Pending,
    /// Partially paid
    Partial,
    /// Fully paid
    Paid,
    /// Nothing paid and past the due date
    Overdue,
    /// Cancelled; rejects all allocations
    Cancelled,
}

/// A single charge on an invoice
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeLine {
    /// Line identifier
    pub id: Uuid,
    /// What is being charged (e.g., "Rent for March 2026")
    pub description: String,
    /// Charge amount
    pub amount: Money,
}

impl ChargeLine {
    /// Creates a new charge line
    pub fn new(description: impl Into<String>, amount: Money) -> Self {
        Self {
            id: Uuid::new_v4(),
            description: description.into(),
            amount,
        }
    }
}

/// Result of allocating a payment to an invoice
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationOutcome {
    /// Cumulative amount paid after the allocation
    pub amount_paid: Money,
    /// Status after the allocation
    pub status: InvoiceStatus,
    /// Amount applied by this allocation (always the full requested amount)
    pub allocated: Money,
}

/// A billable statement for a tenant over a billing period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique identifier
    pub id: InvoiceId,
    /// Human-readable period-scoped number (e.g., "INV-202608-0001")
    pub invoice_number: String,
    /// Owning tenant
    pub tenant_id: TenantId,
    /// Billing period this invoice covers
    pub billing_period_id: BillingPeriodId,
    /// Issue date
    pub issue_date: NaiveDate,
    /// Payment due date
    pub due_date: NaiveDate,
    /// Currency of all monetary fields
    pub currency: Currency,
    /// Ordered charge lines
    pub lines: Vec<ChargeLine>,
    /// Sum of charge lines
    pub total_amount: Money,
    /// Cumulative amount paid; never exceeds the total
    pub amount_paid: Money,
    /// Derived lifecycle status
    pub status: InvoiceStatus,
    /// Free-text notes
    pub notes: Option<String>,
    /// Created timestamp
    pub created_at: DateTime<Utc>,
    /// Updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Invoice {
    /// Creates a new invoice with no charges
    pub fn new(
        invoice_number: impl Into<String>,
        tenant_id: TenantId,
        billing_period_id: BillingPeriodId,
        due_date: NaiveDate,
        currency: Currency,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: InvoiceId::new_v7(),
            invoice_number: invoice_number.into(),
            tenant_id,
            billing_period_id,
            issue_date: now.date_naive(),
            due_date,
            currency,
            lines: Vec::new(),
            total_amount: Money::zero(currency),
            amount_paid: Money::zero(currency),
            status: InvoiceStatus::Pending,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Adds a charge line and recalculates the total
    pub fn add_charge(&mut self, line: ChargeLine) -> Result<(), BillingError> {
        self.total_amount = self.total_amount.checked_add(&line.amount)?;
        self.lines.push(line);
        self.updated_at = Utc::now();
        self.refresh_status(Utc::now().date_naive());
        Ok(())
    }

    /// Returns the amount still owed on this invoice
    pub fn balance_due(&self) -> Money {
        self.total_amount - self.amount_paid
    }

    /// Returns true if the invoice is past due and unpaid as of `today`
    pub fn is_overdue_as_of(&self, today: NaiveDate) -> bool {
        today > self.due_date
            && !matches!(self.status, InvoiceStatus::Paid | InvoiceStatus::Cancelled)
    }

    /// Cancels the invoice; all further allocations are rejected
    pub fn cancel(&mut self) {
        self.status = InvoiceStatus::Cancelled;
        self.updated_at = Utc::now();
    }

    /// Checks whether `amount` could be allocated, without mutating
    ///
    /// Surfaces the same errors `allocate_payment` would: a cancelled
    /// invoice, a non-positive amount, or an amount above the balance due
    /// (carrying the authoritative balance for client correction).
    pub fn ensure_allocatable(&self, amount: Money) -> Result<(), BillingError> {
        if self.status == InvoiceStatus::Cancelled {
            return Err(BillingError::InvoiceNotPayable(self.id));
        }
        if !amount.is_positive() {
            return Err(BillingError::InvalidAmount(amount.amount()));
        }
        let balance_due = self.balance_due();
        if amount.checked_sub(&balance_due)?.is_positive() {
            return Err(BillingError::AmountExceedsBalance { balance_due });
        }
        Ok(())
    }

    /// Allocates a payment to this invoice
    ///
    /// The full amount is applied; splitting an excess intent between
    /// invoice and account is the payment processor's job, done before this
    /// call. Overpayment is rejected, never clamped.
    pub fn allocate_payment(
        &mut self,
        amount: Money,
        today: NaiveDate,
    ) -> Result<AllocationOutcome, BillingError> {
        self.ensure_allocatable(amount)?;

        self.amount_paid = self.amount_paid.checked_add(&amount)?;
        self.updated_at = Utc::now();
        self.refresh_status(today);

        Ok(AllocationOutcome {
            amount_paid: self.amount_paid,
            status: self.status,
            allocated: amount,
        })
    }

    /// Recomputes the status from the paid amount, total and due date
    pub fn refresh_status(&mut self, today: NaiveDate) {
        self.status = self.derive_status(today);
    }

    // Pure status function. Cancelled is sticky; the pending/overdue
    // distinction only applies while nothing has been paid.
    fn derive_status(&self, today: NaiveDate) -> InvoiceStatus {
        if self.status == InvoiceStatus::Cancelled {
            return InvoiceStatus::Cancelled;
        }
        if self.amount_paid == self.total_amount && self.amount_paid.is_positive() {
            return InvoiceStatus::Paid;
        }
        if self.amount_paid.is_positive() {
            return InvoiceStatus::Partial;
        }
        if today > self.due_date {
            InvoiceStatus::Overdue
        } else {
            InvoiceStatus::Pending
        }
    }
}
