//! Secondary deterministic recognition tier.
//!
//! Recognizers are injected capabilities behind the [`Recognizer`] trait; the
//! [`BackupCoordinator`] queries them with timeouts and arbitrates between
//! their answers. Two rule-based recognizers ship built in.

mod coordinator;
mod deadline;
mod entity;
pub mod scoring;
mod traits;

pub use coordinator::{BackupCoordinator, BACKUP_SOURCE};
pub use deadline::DeadlineRecognizer;
pub use entity::{Entity, EntityKind, EntityRecognizer};
pub use traits::{Recognizer, RecognizerStats, RecognizerStatsSnapshot, SourceReliability};
