//! Subcommand implementations

pub mod common;
pub mod conflicts;
pub mod queue;
pub mod run;
