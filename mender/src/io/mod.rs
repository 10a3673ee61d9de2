//! Side effects for mender commands: processes, files, proposers.

pub mod applier;
pub mod config;
pub mod context;
pub mod deploy;
pub mod fsutil;
pub mod init;
pub mod memory;
pub mod plan_store;
pub mod process;
pub mod prompt;
pub mod proposer;
pub mod session_log;
pub mod steps;
