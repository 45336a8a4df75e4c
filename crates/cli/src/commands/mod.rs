//! CLI subcommand implementations

pub mod scale;
