//! CLI subcommand implementations.

pub mod eject;
pub mod flash;
pub mod format;
pub mod info;
pub mod label;
pub mod list;
