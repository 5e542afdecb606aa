//! Billing repository implementation
//!
//! Database access for tenant accounts, invoices, payments, transactions
//! and receipts. The commit-sequence write guards the invoice update with
//! an optimistic predicate on the paid amount it was validated against:
//! two writers that both validated against the same stale balance cannot
//! both match it, so the loser's transaction rolls back with a
//! serialization conflict instead of double-applying.
//!
//! Queries use the runtime SQLx API rather than the compile-time checked
//! macros, so the workspace builds without a reachable database.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;
use uuid::Uuid;

use core_kernel::{
    AccountId, BillingPeriodId, Currency, InvoiceId, Money, PaymentId, ReceiptId, TenantId,
    TransactionId, UserId,
};
use domain_billing::{
    ChargeLine, Invoice, InvoiceStatus, Payment, PaymentMethod, PaymentStatus, PeriodKey, Receipt,
    SequenceKind, Transaction, TransactionKind,
};

use crate::error::StoreError;

/// Repository for the billing engine's persistent state
#[derive(Debug, Clone)]
pub struct BillingRepository {
    pool: PgPool,
}

impl BillingRepository {
    /// Creates a new repository over the given connection pool
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens an account for a tenant, returning the existing id if present
    pub async fn open_account(
        &self,
        tenant_id: TenantId,
        currency: Currency,
    ) -> Result<AccountId, StoreError> {
        let account_id = Uuid::now_v7();
        sqlx::query(
            r#"
            INSERT INTO tenant_accounts (id, tenant_id, balance, currency, created_at, updated_at)
            VALUES ($1, $2, 0, $3, now(), now())
            ON CONFLICT (tenant_id) DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(Uuid::from(tenant_id))
        .bind(currency.code())
        .execute(&self.pool)
        .await?;

        let id: Uuid = sqlx::query_scalar("SELECT id FROM tenant_accounts WHERE tenant_id = $1")
            .bind(Uuid::from(tenant_id))
            .fetch_one(&self.pool)
            .await?;
        Ok(AccountId::from_uuid(id))
    }

    /// Returns a tenant's current account balance
    pub async fn account_balance(&self, tenant_id: TenantId) -> Result<Money, StoreError> {
        let row = sqlx::query("SELECT balance, currency FROM tenant_accounts WHERE tenant_id = $1")
            .bind(Uuid::from(tenant_id))
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("TenantAccount", tenant_id))?;
        read_money(&row, "balance", "currency")
    }

    /// Persists an invoice together with its charge lines
    pub async fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO invoices (
                id, invoice_number, tenant_id, billing_period_id, issue_date,
                due_date, currency, total_amount, amount_paid, status, notes,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(Uuid::from(invoice.id))
        .bind(&invoice.invoice_number)
        .bind(Uuid::from(invoice.tenant_id))
        .bind(Uuid::from(invoice.billing_period_id))
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.currency.code())
        .bind(invoice.total_amount.amount())
        .bind(invoice.amount_paid.amount())
        .bind(invoice_status_code(invoice.status))
        .bind(&invoice.notes)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&mut *tx)
        .await?;

        for line in &invoice.lines {
            sqlx::query(
                r#"
                INSERT INTO invoice_charges (id, invoice_id, description, amount)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(line.id)
            .bind(Uuid::from(invoice.id))
            .bind(&line.description)
            .bind(line.amount.amount())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Loads an invoice with its charge lines
    pub async fn find_invoice(&self, invoice_id: InvoiceId) -> Result<Invoice, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, invoice_number, tenant_id, billing_period_id, issue_date,
                   due_date, currency, total_amount, amount_paid, status, notes,
                   created_at, updated_at
            FROM invoices
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(invoice_id))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("Invoice", invoice_id))?;

        let line_rows = sqlx::query(
            "SELECT id, description, amount FROM invoice_charges WHERE invoice_id = $1 ORDER BY id",
        )
        .bind(Uuid::from(invoice_id))
        .fetch_all(&self.pool)
        .await?;

        invoice_from_rows(&row, &line_rows)
    }

    /// Persists a committed payment outcome as one database transaction
    ///
    /// The account row is locked, then the invoice update (when one was
    /// paid) only applies if the stored paid amount still equals the value
    /// this outcome was validated against; a concurrent writer that got
    /// there first fails the predicate and the whole transaction rolls
    /// back with `SerializationConflict`. Balance and allocation updates
    /// land together with the payment, transaction and receipt inserts,
    /// or not at all.
    pub async fn record_payment(
        &self,
        payment: &Payment,
        transaction: &Transaction,
        receipt: &Receipt,
        invoice: Option<&Invoice>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        let locked_account: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM tenant_accounts WHERE id = $1 FOR UPDATE")
                .bind(Uuid::from(transaction.account_id))
                .fetch_optional(&mut *tx)
                .await?;
        if locked_account.is_none() {
            return Err(StoreError::not_found("TenantAccount", transaction.account_id));
        }

        if let Some(invoice) = invoice {
            // `invoice` is the post-allocation snapshot; the paid amount it
            // was validated against is the snapshot minus this allocation
            let prior_paid =
                invoice.amount_paid.amount() - receipt.amount_allocated_to_invoice.amount();
            let updated = sqlx::query(
                r#"
                UPDATE invoices
                SET amount_paid = $2, status = $3, updated_at = $4
                WHERE id = $1 AND amount_paid = $5
                "#,
            )
            .bind(Uuid::from(invoice.id))
            .bind(invoice.amount_paid.amount())
            .bind(invoice_status_code(invoice.status))
            .bind(invoice.updated_at)
            .bind(prior_paid)
            .execute(&mut *tx)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(StoreError::SerializationConflict(format!(
                    "invoice {} paid amount moved past {} since validation",
                    invoice.id, prior_paid
                )));
            }
        }

        sqlx::query(
            r#"
            UPDATE tenant_accounts
            SET balance = balance + $2, updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(transaction.account_id))
        .bind(transaction.balance_delta().amount())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO payments (
                id, tenant_id, invoice_id, amount, currency, method,
                reference_number, status, payment_date, transaction_id,
                receipt_id, processed_by, notes, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(Uuid::from(payment.id))
        .bind(Uuid::from(payment.tenant_id))
        .bind(payment.invoice_id.map(Uuid::from))
        .bind(payment.amount.amount())
        .bind(payment.amount.currency().code())
        .bind(method_code(payment.method))
        .bind(&payment.reference_number)
        .bind(payment_status_code(payment.status))
        .bind(payment.payment_date)
        .bind(payment.transaction_id.map(Uuid::from))
        .bind(payment.receipt_id.map(Uuid::from))
        .bind(payment.processed_by.map(Uuid::from))
        .bind(&payment.notes)
        .bind(payment.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO ledger_transactions (
                id, account_id, kind, amount, currency, method, invoice_id,
                reference_number, description, processed_by, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(Uuid::from(transaction.id))
        .bind(Uuid::from(transaction.account_id))
        .bind(kind_code(transaction.kind))
        .bind(transaction.amount.amount())
        .bind(transaction.amount.currency().code())
        .bind(transaction.method.map(method_code))
        .bind(transaction.invoice_id.map(Uuid::from))
        .bind(&transaction.reference_number)
        .bind(&transaction.description)
        .bind(transaction.processed_by.map(Uuid::from))
        .bind(transaction.created_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO receipts (
                id, receipt_number, transaction_id, payment_id, tenant_id,
                invoice_id, amount, amount_allocated_to_invoice,
                amount_to_account, currency, payment_date, method, issued_by,
                notes, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(Uuid::from(receipt.id))
        .bind(&receipt.receipt_number)
        .bind(Uuid::from(receipt.transaction_id))
        .bind(Uuid::from(receipt.payment_id))
        .bind(Uuid::from(receipt.tenant_id))
        .bind(receipt.invoice_id.map(Uuid::from))
        .bind(receipt.amount.amount())
        .bind(receipt.amount_allocated_to_invoice.amount())
        .bind(receipt.amount_to_account.amount())
        .bind(receipt.amount.currency().code())
        .bind(receipt.payment_date)
        .bind(method_code(receipt.method))
        .bind(receipt.issued_by.map(Uuid::from))
        .bind(&receipt.notes)
        .bind(receipt.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        debug!(payment = %payment.id, receipt = %receipt.receipt_number, "payment persisted");
        Ok(())
    }

    /// Allocates the next number in `(kind, period)` as one atomic
    /// increment-and-read
    ///
    /// The upsert takes a row lock on the counter, so concurrent callers
    /// serialize and can never observe the same value.
    pub async fn next_sequence_number(
        &self,
        kind: SequenceKind,
        period: PeriodKey,
    ) -> Result<String, StoreError> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO sequence_counters (kind, period, value)
            VALUES ($1, $2, 1)
            ON CONFLICT (kind, period)
            DO UPDATE SET value = sequence_counters.value + 1
            RETURNING value
            "#,
        )
        .bind(kind.prefix())
        .bind(period.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(format!("{}-{}-{:04}", kind.prefix(), period, value))
    }

    /// Returns true if a payment reference number is already in use
    pub async fn reference_exists(&self, reference: &str) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM payments WHERE reference_number = $1)")
                .bind(reference)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    /// Loads a payment by id
    pub async fn find_payment(&self, payment_id: PaymentId) -> Result<Payment, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, tenant_id, invoice_id, amount, currency, method,
                   reference_number, status, payment_date, transaction_id,
                   receipt_id, processed_by, notes, created_at
            FROM payments
            WHERE id = $1
            "#,
        )
        .bind(Uuid::from(payment_id))
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::not_found("Payment", payment_id))?;
        payment_from_row(&row)
    }

    /// Returns all receipts issued to a tenant, newest first
    pub async fn receipts_for_tenant(
        &self,
        tenant_id: TenantId,
    ) -> Result<Vec<Receipt>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, receipt_number, transaction_id, payment_id, tenant_id,
                   invoice_id, amount, amount_allocated_to_invoice,
                   amount_to_account, currency, payment_date, method,
                   issued_by, notes, created_at
            FROM receipts
            WHERE tenant_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(Uuid::from(tenant_id))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(receipt_from_row).collect()
    }
}

// Text codes for enum columns; the schema constrains them with CHECK

fn method_code(method: PaymentMethod) -> &'static str {
    match method {
        PaymentMethod::Cash => "cash",
        PaymentMethod::BankTransfer => "bank_transfer",
        PaymentMethod::Card => "card",
        PaymentMethod::MobileMoney => "mobile_money",
        PaymentMethod::Check => "check",
        PaymentMethod::Other => "other",
    }
}

fn method_from_code(code: &str) -> Result<PaymentMethod, StoreError> {
    match code {
        "cash" => Ok(PaymentMethod::Cash),
        "bank_transfer" => Ok(PaymentMethod::BankTransfer),
        "card" => Ok(PaymentMethod::Card),
        "mobile_money" => Ok(PaymentMethod::MobileMoney),
        "check" => Ok(PaymentMethod::Check),
        "other" => Ok(PaymentMethod::Other),
        other => Err(StoreError::QueryFailed(format!(
            "unknown payment method code: {other}"
        ))),
    }
}

fn kind_code(kind: TransactionKind) -> &'static str {
    match kind {
        TransactionKind::Payment => "payment",
        TransactionKind::Refund => "refund",
        TransactionKind::Adjustment => "adjustment",
    }
}

fn invoice_status_code(status: InvoiceStatus) -> &'static str {
    match status {
        InvoiceStatus::Pending => "pending",
        InvoiceStatus::Partial => "partial",
        InvoiceStatus::Paid => "paid",
        InvoiceStatus::Overdue => "overdue",
        InvoiceStatus::Cancelled => "cancelled",
    }
}

fn invoice_status_from_code(code: &str) -> Result<InvoiceStatus, StoreError> {
    match code {
        "pending" => Ok(InvoiceStatus::Pending),
        "partial" => Ok(InvoiceStatus::Partial),
        "paid" => Ok(InvoiceStatus::Paid),
        "overdue" => Ok(InvoiceStatus::Overdue),
        "cancelled" => Ok(InvoiceStatus::Cancelled),
        other => Err(StoreError::QueryFailed(format!(
            "unknown invoice status code: {other}"
        ))),
    }
}

fn payment_status_code(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Pending => "pending",
        PaymentStatus::Completed => "completed",
        PaymentStatus::Failed => "failed",
        PaymentStatus::Refunded => "refunded",
    }
}

fn payment_status_from_code(code: &str) -> Result<PaymentStatus, StoreError> {
    match code {
        "pending" => Ok(PaymentStatus::Pending),
        "completed" => Ok(PaymentStatus::Completed),
        "failed" => Ok(PaymentStatus::Failed),
        "refunded" => Ok(PaymentStatus::Refunded),
        other => Err(StoreError::QueryFailed(format!(
            "unknown payment status code: {other}"
        ))),
    }
}

fn read_currency(row: &PgRow, column: &str) -> Result<Currency, StoreError> {
    let code: String = row.try_get(column)?;
    Currency::from_str(&code).map_err(|e| StoreError::QueryFailed(e.to_string()))
}

fn read_money(row: &PgRow, amount_column: &str, currency_column: &str) -> Result<Money, StoreError> {
    let amount: Decimal = row.try_get(amount_column)?;
    let currency = read_currency(row, currency_column)?;
    Ok(Money::new(amount, currency))
}

fn invoice_from_rows(row: &PgRow, line_rows: &[PgRow]) -> Result<Invoice, StoreError> {
    let currency = read_currency(row, "currency")?;
    let lines = line_rows
        .iter()
        .map(|line| {
            let id: Uuid = line.try_get("id")?;
            let description: String = line.try_get("description")?;
            let amount: Decimal = line.try_get("amount")?;
            Ok::<_, sqlx::Error>(ChargeLine {
                id,
                description,
                amount: Money::new(amount, currency),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let id: Uuid = row.try_get("id")?;
    let tenant_id: Uuid = row.try_get("tenant_id")?;
    let billing_period_id: Uuid = row.try_get("billing_period_id")?;
    let issue_date: NaiveDate = row.try_get("issue_date")?;
    let due_date: NaiveDate = row.try_get("due_date")?;
    let status: String = row.try_get("status")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;

    Ok(Invoice {
        id: InvoiceId::from_uuid(id),
        invoice_number: row.try_get("invoice_number")?,
        tenant_id: TenantId::from_uuid(tenant_id),
        billing_period_id: BillingPeriodId::from_uuid(billing_period_id),
        issue_date,
        due_date,
        currency,
        lines,
        total_amount: read_money(row, "total_amount", "currency")?,
        amount_paid: read_money(row, "amount_paid", "currency")?,
        status: invoice_status_from_code(&status)?,
        notes: row.try_get("notes")?,
        created_at,
        updated_at,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let tenant_id: Uuid = row.try_get("tenant_id")?;
    let invoice_id: Option<Uuid> = row.try_get("invoice_id")?;
    let method: String = row.try_get("method")?;
    let status: String = row.try_get("status")?;
    let transaction_id: Option<Uuid> = row.try_get("transaction_id")?;
    let receipt_id: Option<Uuid> = row.try_get("receipt_id")?;
    let processed_by: Option<Uuid> = row.try_get("processed_by")?;

    Ok(Payment {
        id: PaymentId::from_uuid(id),
        tenant_id: TenantId::from_uuid(tenant_id),
        invoice_id: invoice_id.map(InvoiceId::from_uuid),
        amount: read_money(row, "amount", "currency")?,
        method: method_from_code(&method)?,
        reference_number: row.try_get("reference_number")?,
        status: payment_status_from_code(&status)?,
        payment_date: row.try_get("payment_date")?,
        transaction_id: transaction_id.map(TransactionId::from_uuid),
        receipt_id: receipt_id.map(ReceiptId::from_uuid),
        processed_by: processed_by.map(UserId::from_uuid),
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
    })
}

fn receipt_from_row(row: &PgRow) -> Result<Receipt, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let transaction_id: Uuid = row.try_get("transaction_id")?;
    let payment_id: Uuid = row.try_get("payment_id")?;
    let tenant_id: Uuid = row.try_get("tenant_id")?;
    let invoice_id: Option<Uuid> = row.try_get("invoice_id")?;
    let method: String = row.try_get("method")?;
    let issued_by: Option<Uuid> = row.try_get("issued_by")?;

    Ok(Receipt {
        id: ReceiptId::from_uuid(id),
        receipt_number: row.try_get("receipt_number")?,
        transaction_id: TransactionId::from_uuid(transaction_id),
        payment_id: PaymentId::from_uuid(payment_id),
        tenant_id: TenantId::from_uuid(tenant_id),
        invoice_id: invoice_id.map(InvoiceId::from_uuid),
        amount: read_money(row, "amount", "currency")?,
        amount_allocated_to_invoice: read_money(row, "amount_allocated_to_invoice", "currency")?,
        amount_to_account: read_money(row, "amount_to_account", "currency")?,
        payment_date: row.try_get("payment_date")?,
        method: method_from_code(&method)?,
        issued_by: issued_by.map(UserId::from_uuid),
        notes: row.try_get("notes")?,
        created_at: row.try_get("created_at")?,
    })
}
