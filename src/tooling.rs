//! Tooling
//!
//! Operator CLI over a sled-backed local store and either the local or the
//! HTTP pinning service.

pub mod cli;

pub use cli::{Cli, CliContext, Commands};
