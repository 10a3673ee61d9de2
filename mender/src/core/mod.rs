//! Deterministic, pure logic shared by the mender loop.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! data structures and return deterministic outputs suitable for tests.

pub mod plan;
pub mod resolve;
pub mod retry;
pub mod root_policy;
pub mod text;
pub mod types;
