//! Core Kernel - Foundational types for the rental billing system
//!
//! This crate provides the building blocks shared by every domain module:
//! - Money types with precise decimal arithmetic
//! - Strongly-typed entity identifiers

pub mod identifiers;
pub mod money;

pub use identifiers::{
    AccountId, BillingPeriodId, InvoiceId, PaymentId, PropertyId, ReceiptId, TenantId,
    TransactionId, UserId,
};
pub use money::{Currency, Money, MoneyError};
