//! # Readtrack
//!
//! Per-post read receipts for a messaging platform.
//!
//! ## Overview
//!
//! [`ReceiptService`] is the entry point. It records that a user read a
//! post, answers "who read this" with the viewer's privacy setting applied,
//! keeps per-post [`Summary`](readtrack_core::Summary) rows current through a
//! background [`SummaryQueue`], and can reconstruct receipts for a channel
//! from member view times ([`BackfillReconstructor`]).
//!
//! Posts, channels, memberships, preferences, and notifications belong to
//! the host platform and are reached through the traits in
//! [`collaborators`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use readtrack::collaborators::memory::{MemoryDirectory, MemoryPreferences, RecordingSink};
//! use readtrack::collaborators::{DeviceIdClassifier, StoreMembership};
//! use readtrack::{Collaborators, ReceiptConfig, ReceiptService};
//! use readtrack::core::{PostId, UserId};
//! use readtrack::store::SqliteStore;
//!
//! async fn example() -> readtrack::Result<()> {
//!     let store = Arc::new(SqliteStore::open("receipts.db")?);
//!     let collaborators = Collaborators {
//!         directory: Arc::new(MemoryDirectory::new()),
//!         membership: Arc::new(StoreMembership::new(store.clone())),
//!         preferences: Arc::new(MemoryPreferences::new()),
//!         devices: Arc::new(DeviceIdClassifier),
//!         notifications: Arc::new(RecordingSink::new()),
//!     };
//!     let service = ReceiptService::with_shared_store(store, collaborators, ReceiptConfig::default());
//!
//!     service
//!         .mark_read(&UserId::new("u1"), &PostId::new("p1"), 1_700_000_000_000, Some("desktop-1"))
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `readtrack::core` - data model and privacy filter
//! - `readtrack::store` - storage trait and backends

pub mod aggregator;
pub mod backfill;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod events;
pub mod service;

pub use readtrack_core as core;
pub use readtrack_store as store;

pub use aggregator::{SummaryAggregator, SummaryQueue};
pub use backfill::{BackfillReconstructor, BackfillReport};
pub use collaborators::{
    CollaboratorError, CollaboratorResult, DeviceClassifier, DeviceIdClassifier, Directory,
    MembershipResolver, NotificationSink, PreferenceResolver, StoreMembership,
};
pub use config::{ReceiptConfig, RefreshPolicy};
pub use error::{PolicyViolation, Result, ServiceError};
pub use events::ReceiptEvent;
pub use service::{Collaborators, ReceiptService};
