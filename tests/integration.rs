//! Integration tests for Almanac.
//!
//! These drive the public API end to end with deterministic fakes in place
//! of external recognizers and the language model. Set `RUST_LOG` to see
//! tier decisions:
//! ```bash
//! RUST_LOG=almanac=debug cargo test --test integration -- --nocapture
//! ```

use almanac::ReferenceTime;

#[path = "integration/test_scenarios.rs"]
mod test_scenarios;

#[path = "integration/test_escalation.rs"]
mod test_escalation;

#[path = "integration/test_properties.rs"]
mod test_properties;

/// Route `tracing` output through the test harness.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Monday, September 29 2025, 17:00.
pub fn reference() -> ReferenceTime {
    ReferenceTime::at(2025, 9, 29, 17, 0).expect("valid reference time")
}
