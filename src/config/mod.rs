//! Configuration module
//!
//! Resolves server settings from defaults, an optional TOML file and
//! command line / environment overrides.

mod settings;

pub use settings::*;
