//! stratus-health — reachability tests for cluster nodes.
//!
//! A node type declares [`TestCase`]s; each one is an HTTP or HTTPS GET
//! against the node whose body must match the configured expectations.
//!
//! # Matching
//!
//! ```text
//! body starts with should_start_with ── yes ──► Passed
//!        │ no
//! body contains should_contain ──────── yes ──► Passed
//!        │ no
//! neither expectation configured ────── yes ──► Passed
//!        │ no
//!        ▼
//!     Mismatch
//! ```
//!
//! The status code is reported but never decides the outcome.
//!
//! [`TestCase`]: stratus_core::config::TestCase

pub mod checker;

pub use checker::{ProbeError, ProbeOutcome, check_body, probe, test_url};
