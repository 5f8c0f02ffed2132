//! # Readtrack Store
//!
//! Storage abstraction for read tracking. Provides a trait-based interface
//! for receipt, summary, audit, and membership persistence with SQLite and
//! in-memory implementations.
//!
//! ## Overview
//!
//! The [`ReceiptStore`] trait keeps the service storage-agnostic. The
//! primary implementation is [`SqliteStore`], with [`MemoryStore`] for tests.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use readtrack_core::{ChannelId, PostId, ReceiptBuilder, UserId};
//! use readtrack_store::{ReceiptStore, SqliteStore};
//!
//! async fn example() -> readtrack_store::Result<()> {
//!     let store = SqliteStore::open("receipts.db")?;
//!
//!     let receipt = ReceiptBuilder::new(PostId::new("p1"), UserId::new("u1"), ChannelId::new("c1"))
//!         .read_at(1_700_000_000_000)
//!         .created_at(1_700_000_000_000)
//!         .build();
//!     store.upsert_receipt(&receipt).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Upsert by key**: one receipt per `(post, user)`; re-reads overwrite
//! - **Atomic batches**: a batch upsert commits every row or none
//! - **Idempotent deletes**: removing a missing row succeeds

pub mod error;
pub mod memory;
pub mod migration;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{ReceiptStore, ReceiptStoreExt};
