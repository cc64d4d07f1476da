//! CLI module - command-line interface
//!
//! Subcommand definitions and their handlers.

pub mod commands;

pub use commands::{run, Command};
