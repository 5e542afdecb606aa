//! PostgreSQL persistence layer
//!
//! This crate provides the database infrastructure for the billing engine,
//! backed by SQLx on PostgreSQL.
//!
//! # Architecture
//!
//! The crate follows the repository pattern: repositories encapsulate SQL
//! and row mapping, and the domain layer never sees the database. The
//! multi-record payment write (payment, ledger transaction, invoice
//! update, receipt) runs in a single database transaction behind row
//! locks, and sequential document numbers come from an upsert counter
//! table so allocation is one atomic increment-and-read.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_store::{create_pool_from_url, BillingRepository};
//!
//! let pool = create_pool_from_url("postgres://localhost/rentals").await?;
//! let repo = BillingRepository::new(pool);
//! ```

pub mod error;
pub mod pool;
pub mod repositories;

pub use error::StoreError;
pub use pool::{create_pool, create_pool_from_url, run_migrations, DatabaseConfig, DatabasePool};
pub use repositories::BillingRepository;
