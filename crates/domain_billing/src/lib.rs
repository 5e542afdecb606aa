//! Billing Domain - Payment Reconciliation Engine
//!
//! This crate implements the billing core of the rental management system:
//! given a payment intent and an authenticated caller, it atomically
//! updates a payment record, a ledger transaction, a receipt, the
//! invoice's paid/balance state and the tenant's account balance, while
//! enforcing ownership, amount and idempotency invariants.
//!
//! # Components
//!
//! - [`numbering`]: collision-resistant payment references and
//!   period-scoped sequential receipt/invoice numbers
//! - [`invoice`]: the invoice ledger - charge lines, totals and the
//!   paid/partial/overdue status function
//! - [`account`]: the tenant account ledger - a signed running balance
//!   mutated only by appending transactions
//! - [`processor`]: the orchestrator driving all of the above through one
//!   atomic commit per submission
//! - [`access`]: the caller identity model and scope guard
//!
//! # Example
//!
//! ```rust,ignore
//! use domain_billing::{BillingLedger, PaymentProcessor, PaymentIntent, Caller};
//!
//! let ledger = Arc::new(BillingLedger::new(Currency::USD));
//! let processor = PaymentProcessor::new(ledger, guard);
//!
//! let intent = PaymentIntent::new(tenant_id, PaymentMethod::BankTransfer)
//!     .for_invoice(invoice_id);
//! let outcome = processor.submit_payment(&caller, &intent)?;
//! ```

pub mod access;
pub mod account;
pub mod error;
pub mod invoice;
pub mod ledger;
pub mod numbering;
pub mod payment;
pub mod processor;
pub mod receipt;
pub mod transaction;

pub use access::{AccessGuard, Caller, PropertyScopeGuard, Role};
pub use account::TenantAccount;
pub use error::BillingError;
pub use invoice::{AllocationOutcome, ChargeLine, Invoice, InvoiceStatus};
pub use ledger::BillingLedger;
pub use numbering::{PeriodKey, SequenceCounters, SequenceKind};
pub use payment::{Payment, PaymentIntent, PaymentStatus};
pub use processor::{PaymentOutcome, PaymentProcessor};
pub use receipt::Receipt;
pub use transaction::{PaymentMethod, Transaction, TransactionKind};
