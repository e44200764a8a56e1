//! # auditflow-cli — Command-Line Interface
//!
//! Provides the `auditflow` binary for operating the engagement lifecycle
//! engine outside an API process.
//!
//! ## Subcommands
//!
//! - `auditflow rules` — load and validate a stage-rule file.
//! - `auditflow scan` — run the commencement-date auto-transition scanner.
//! - `auditflow check` — pre-check a transition without applying it.
//! - `auditflow transition` — apply a transition.
//!
//! Runtime settings come from the environment (`DATABASE_URL`,
//! `AUDITFLOW_*`); see [`auditflow_engine::AuditflowConfig`]. Without a
//! database `rules` and `scan` run against an empty in-memory store, and
//! `check` and `transition` refuse to start.
//!
//! ## Exit codes
//!
//! `0` on success, `2` when the engine refused the request (the refusal is
//! printed as JSON on stdout), `1` on any other failure.

pub mod rules;
pub mod runtime;
pub mod scan;
pub mod transition;

/// Exit code for a request the engine refused.
pub const EXIT_REFUSED: u8 = 2;
