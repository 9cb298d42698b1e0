//! Typed, fillable forms written in markdown, and a turn-based fill harness.
//!
//! The crate keeps the same split throughout:
//!
//! - **[`core`]**: Pure, deterministic logic (parsing, serialization,
//!   validation, inspection, patching, scheduling). No I/O.
//! - **[`io`]**: Side-effecting helpers (documents and configs on disk,
//!   fill-record sidecars).
//!
//! [`fill`] drives the inspect → delegate → apply → record loop over a
//! [`core::document::Document`], calling out to a [`agents::FillAgent`].

pub mod agents;
pub mod core;
pub mod exit_codes;
pub mod fill;
pub mod io;
pub mod logging;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
