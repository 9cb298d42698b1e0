//! Deterministic, pure document logic.
//!
//! Core modules are free of I/O. They operate on in-memory documents and
//! return deterministic outputs suitable for tests.

pub mod document;
pub mod error;
pub mod export;
pub mod frontmatter;
pub mod inspect;
pub mod model;
pub mod parser;
pub mod patch;
pub mod response;
pub mod schedule;
pub mod serializer;
pub mod syntax;
pub mod validate;
