//! Stable exit codes for mender CLI commands.
//!
//! A failed heal pass exits with the failing step's own exit code when it has
//! one, so CI sees the same status the pipeline produced.

/// Pipeline green, plan complete, or command succeeded.
pub const OK: i32 = 0;
/// Terminal failure without a usable step exit code, or invalid config/usage.
pub const FAILURE: i32 = 1;
/// Stopped by Ctrl+C.
pub const INTERRUPTED: i32 = 130;
