//! Language-model tier.
//!
//! The enhancer is an injected capability; the orchestrator treats an
//! unavailable or failing enhancer exactly like a missing one. Whatever an
//! enhancer returns, the description stays the original request text.

mod openai;

pub use openai::{parse_enhancer_response, OpenAiEnhancer};

use async_trait::async_trait;

use crate::error::Result;
use crate::event::{EventRecord, ReferenceTime};

/// Fills in fields the deterministic tiers could not resolve.
#[async_trait]
pub trait LanguageModelEnhancer: Send + Sync {
    fn name(&self) -> &str {
        "language_model"
    }

    async fn is_available(&self) -> bool;

    /// Return a record with the fields the model could extract. `partial`
    /// carries what the cheaper tiers already found.
    async fn enhance(
        &self,
        text: &str,
        partial: &EventRecord,
        reference: &ReferenceTime,
    ) -> Result<EventRecord>;
}
