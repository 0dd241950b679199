//! Command-line interface for enrich-forge.
//!
//! Provides job administration commands over the SQLite state store.

mod commands;

pub use commands::{parse_cli, run, run_with_cli, Cli};
