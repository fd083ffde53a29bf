//! Configuration management for Almanac.

mod settings;

pub use settings::*;
