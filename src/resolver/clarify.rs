//! Clarification channel used to narrow ambiguous or missing fields.

/// A person who can answer questions about a parse.
///
/// `choose_one` receives the ranked options, best first, followed by a
/// final manual-entry option, and returns the index of the choice.
pub trait ClarificationChannel: Send + Sync {
    fn choose_one(&self, prompt: &str, options: &[String]) -> usize;

    fn confirm(&self, prompt: &str) -> bool;

    /// Free text, or `None` when the person declines to answer.
    fn read_text(&self, prompt: &str) -> Option<String>;
}

/// Channel for contexts without a person: always takes the top-ranked
/// option and never supplies text.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive;

impl ClarificationChannel for NonInteractive {
    fn choose_one(&self, _prompt: &str, _options: &[String]) -> usize {
        0
    }

    fn confirm(&self, _prompt: &str) -> bool {
        true
    }

    fn read_text(&self, _prompt: &str) -> Option<String> {
        None
    }
}
