//! Repository implementations for the billing domain
//!
//! Repositories encapsulate SQL access and map between database rows and
//! domain types. Writes that span several records (a payment with its
//! ledger transaction, invoice update and receipt) run inside a single
//! database transaction with row locks, mirroring the all-or-nothing
//! commit the in-memory ledger provides.

pub mod billing;

pub use billing::BillingRepository;
