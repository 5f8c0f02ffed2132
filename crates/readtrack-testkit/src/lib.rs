//! # Readtrack Testkit
//!
//! Testing utilities for readtrack.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: a [`ReceiptService`](readtrack::ReceiptService) wired over
//!   in-memory collaborators ([`ServiceFixture`])
//! - **Generators**: Proptest strategies for receipts and ids
//! - **Fault injection**: [`FlakyStore`] wraps any store and fails on demand
//!
//! End-to-end scenarios live under `tests/`.
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use readtrack_testkit::generators::{receipt_from_params, ReceiptParams};
//!
//! proptest! {
//!     #[test]
//!     fn generated_receipts_validate(params: ReceiptParams) {
//!         let r = receipt_from_params(&params);
//!         prop_assert!(readtrack_core::validate_receipt(&r).is_ok());
//!     }
//! }
//! ```

pub mod fixtures;
pub mod flaky;
pub mod generators;

pub use fixtures::{direct_message_fixture, ServiceFixture};
pub use flaky::FlakyStore;
pub use generators::{receipt_from_params, ReceiptParams};
