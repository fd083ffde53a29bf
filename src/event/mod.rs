//! Event data model: fields, candidates, field results and merged records.

mod types;

pub use types::*;
