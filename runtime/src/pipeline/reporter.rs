//! Writes the job's current step to the store as the pipeline advances.

use sitegauge::{CurrentStep, FullSiteProgress, SinglePageProgress, Store};
use std::sync::Mutex;
use tracing::warn;

/// Holds the latest step snapshot and persists every update.
///
/// Progress writes are best-effort: a failed write is logged and the
/// pipeline carries on.
pub struct StepReporter {
    store: Store,
    job_id: String,
    step: Mutex<CurrentStep>,
}

impl StepReporter {
    pub fn new(store: Store, job_id: &str, initial: CurrentStep) -> Self {
        let reporter = Self {
            store,
            job_id: job_id.to_string(),
            step: Mutex::new(initial.clone()),
        };
        reporter.persist(&initial);
        reporter
    }

    pub fn snapshot(&self) -> CurrentStep {
        match self.step.lock() {
            Ok(step) => step.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn update(&self, f: impl FnOnce(&mut CurrentStep)) {
        let mut step = match self.step.lock() {
            Ok(step) => step,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut step);
        self.persist(&step);
    }

    /// Update full-site counters. No-op for a single-page step.
    pub fn full_site(&self, f: impl FnOnce(&mut FullSiteProgress)) {
        self.update(|step| {
            if let CurrentStep::FullSite(p) = step {
                f(p);
            }
        });
    }

    /// Update single-page counters. No-op for a full-site step.
    pub fn single_page(&self, f: impl FnOnce(&mut SinglePageProgress)) {
        self.update(|step| {
            if let CurrentStep::SinglePage(p) = step {
                f(p);
            }
        });
    }

    fn persist(&self, step: &CurrentStep) {
        if let Err(e) = self.store.set_current_step(&self.job_id, step) {
            warn!("failed to record progress for job {}: {e}", self.job_id);
        }
    }
}
