// SPDX-License-Identifier: MIT OR Apache-2.0
//! Warning sinks.
//!
//! The core never touches stdout or stderr directly; it raises warnings
//! through a sink. Headless runs use the console sink (stderr only, so
//! stdout stays machine-readable); UI runs use the event sink.

use crate::{EventBus, RunEvent};
use arb_core::RunWarning;
use std::sync::Arc;

/// Destination for out-of-band warnings.
pub trait WarningSink: Send + Sync {
    /// Surface one warning.
    fn raise(&self, warning: RunWarning);
}

/// Writes warnings to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleWarningSink;

impl WarningSink for ConsoleWarningSink {
    fn raise(&self, warning: RunWarning) {
        eprintln!("warning: {warning}");
    }
}

/// Emits `warning.raised` events onto the bus.
///
/// Delivery failures are swallowed: a warning must never fail a run.
pub struct EventWarningSink {
    bus: Arc<EventBus>,
}

impl EventWarningSink {
    /// Build a sink over the given bus.
    #[must_use]
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

impl WarningSink for EventWarningSink {
    fn raise(&self, warning: RunWarning) {
        let _ = self.bus.emit(RunEvent::WarningRaised { warning });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arb_core::WarningCode;
    use std::sync::Mutex;

    #[tokio::test]
    async fn event_sink_emits_onto_bus() {
        let bus = Arc::new(EventBus::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        bus.subscribe(move |env| {
            if let RunEvent::WarningRaised { warning } = &env.event {
                sink_seen.lock().unwrap().push(warning.clone());
            }
            Ok(())
        });
        let sink = EventWarningSink::new(Arc::clone(&bus));
        sink.raise(RunWarning::new(WarningCode::FreeTierModel, "free model"));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].code, WarningCode::FreeTierModel);
    }

    #[tokio::test]
    async fn event_sink_swallows_handler_errors() {
        let bus = Arc::new(EventBus::new());
        bus.subscribe(|_| Err(crate::EventError::Handler("always".into())));
        let sink = EventWarningSink::new(bus);
        // Must not panic or propagate.
        sink.raise(RunWarning::new(WarningCode::Other, "x"));
    }
}
