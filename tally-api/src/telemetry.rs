use std::sync::Arc;
use std::sync::Mutex;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryCounters {
    pub batches_run: usize,
    pub matches_confirmed: usize,
    pub drafts_generated: usize,
    pub exceptions_opened: usize,
    pub transitions_applied: usize,
    pub corrections_recorded: usize,
    pub invoices_extracted: usize,
    pub extractions_degraded: usize,
}

/// Process-wide counters for dashboards. Cheap to clone and share.
#[derive(Clone, Default)]
pub struct TallyTelemetry {
    inner: Arc<Mutex<TelemetryCounters>>,
}

impl TallyTelemetry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn update(&self, apply: impl FnOnce(&mut TelemetryCounters)) {
        if let Ok(mut counters) = self.inner.lock() {
            apply(&mut counters);
        }
    }

    pub fn record_batch(&self, matches: usize, drafts: usize, exceptions: usize) {
        self.update(|counters| {
            counters.batches_run += 1;
            counters.matches_confirmed += matches;
            counters.drafts_generated += drafts;
            counters.exceptions_opened += exceptions;
        });
    }

    pub fn record_transition(&self) {
        self.update(|counters| counters.transitions_applied += 1);
    }

    pub fn record_correction(&self) {
        self.update(|counters| counters.corrections_recorded += 1);
    }

    pub fn record_extraction(&self, degraded: bool) {
        self.update(|counters| {
            counters.invoices_extracted += 1;
            if degraded {
                counters.extractions_degraded += 1;
            }
        });
    }

    #[must_use]
    pub fn snapshot(&self) -> TelemetryCounters {
        self.inner
            .lock()
            .map(|counters| counters.clone())
            .unwrap_or_default()
    }
}
