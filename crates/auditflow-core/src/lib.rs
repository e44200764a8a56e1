//! # auditflow-core — Foundational Types
//!
//! The leaf of the auditflow dependency DAG. Defines the primitives every
//! other crate agrees on:
//!
//! 1. **Identifier newtypes.** `EngagementId` and `ActorId` wrap UUIDs so an
//!    actor can never be passed where an engagement is expected.
//!
//! 2. **UTC epoch timestamps.** `Timestamp` is UTC with seconds precision and
//!    converts losslessly to and from the epoch seconds the record store uses.
//!
//! 3. **Injectable time.** Every date-gated rule reads "now" through the
//!    [`Clock`] trait. Production wires [`SystemClock`]; tests wire
//!    [`FixedClock`].
//!
//! ## Crate Policy
//!
//! - No dependencies on other `auditflow-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod identity;
pub mod temporal;

pub use error::CoreError;
pub use identity::{ActorId, EngagementId};
pub use temporal::{Clock, FixedClock, SystemClock, Timestamp};
