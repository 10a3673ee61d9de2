//! Self-healing build loop for web repositories.
//!
//! Mender runs a repository's verification pipeline (lint, test, build), and
//! when a required step fails it asks a code-generation backend for a batch of
//! snippet edits, applies them inside an allow-listed set of roots, and
//! re-verifies within a bounded number of attempts. The architecture keeps a
//! strict separation:
//!
//! - **[`core`]**: Pure, deterministic logic (plan parsing, path policy, edit
//!   resolution, retry state machine). No I/O.
//! - **[`io`]**: Side-effecting operations (processes, filesystem, proposer
//!   backends). Behind traits where tests need to script them.
//!
//! Orchestration modules ([`heal`], [`looping`], [`features`]) coordinate core
//! logic with I/O to implement CLI commands.

pub mod core;
pub mod exit_codes;
pub mod features;
pub mod heal;
pub mod io;
pub mod logging;
pub mod looping;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
