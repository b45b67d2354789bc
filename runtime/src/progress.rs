// Copyright 2026 Sitegauge Contributors
// SPDX-License-Identifier: Apache-2.0

//! Live job progress derived from the persisted job row.
//!
//! The streamer polls the store at a fixed interval and emits a
//! `ProgressEvent` whenever the job's phase key changes. The stream ends
//! after the first event carrying a terminal status. A job whose phase key
//! stays put for `STALE_TICK_LIMIT` consecutive polls, while no
//! long-running step is in flight, is declared stale and failed.

use serde::Serialize;
use sitegauge::{AuditJob, AuditMode, CurrentStep, JobStatus, Store};
use std::time::Duration;
use tracing::{debug, warn};

/// Poll interval for full-site jobs.
pub const FULL_SITE_INTERVAL: Duration = Duration::from_secs(5);
/// Poll interval for single-page jobs.
pub const SINGLE_PAGE_INTERVAL: Duration = Duration::from_secs(10);
/// Consecutive unchanged polls tolerated before a job is failed.
pub const STALE_TICK_LIMIT: u32 = 12;

/// Comparable summary of how far a job has advanced.
///
/// Ordered by status first, then by the step counters.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PhaseKey {
    rank: u8,
    counters: Vec<u32>,
}

impl PhaseKey {
    pub fn of(job: &AuditJob) -> Self {
        let counters = match &job.current_step {
            Some(CurrentStep::FullSite(p)) => vec![
                p.discovered,
                p.fingerprinted,
                p.templates,
                p.audited,
                p.skipped,
                p.template_index,
                p.viewport_index,
                p.criterion_index,
            ],
            Some(CurrentStep::SinglePage(p)) => vec![
                p.viewport.map(|v| v as u32 + 1).unwrap_or(0),
                p.criterion_index,
            ],
            None => Vec::new(),
        };
        Self {
            rank: job.status.rank(),
            counters,
        }
    }
}

/// One progress event, serialized as a flat JSON object.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub job_id: String,
    /// Increases by one per event within a stream.
    pub seq: u64,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compliance_rate: Option<f64>,
    #[serde(flatten)]
    pub step: Option<CurrentStep>,
}

impl ProgressEvent {
    pub fn from_job(job: &AuditJob, seq: u64) -> Self {
        Self {
            job_id: job.id.clone(),
            seq,
            status: job.status,
            error: job.error.clone(),
            compliance_rate: job.compliance_rate,
            step: job.current_step.clone(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// What a single poll should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Phase changed (or first poll): emit an event.
    Emit,
    /// Nothing new.
    Quiet,
    /// Unchanged for too long: fail the job and close.
    Stale,
    /// Job reached a terminal status: emit and close.
    Terminal,
}

/// Counts consecutive polls without forward progress.
#[derive(Debug, Clone)]
pub struct StalenessTracker {
    last: Option<PhaseKey>,
    stale_ticks: u32,
    limit: u32,
}

impl StalenessTracker {
    pub fn new(limit: u32) -> Self {
        Self {
            last: None,
            stale_ticks: 0,
            limit: limit.max(1),
        }
    }

    pub fn stale_ticks(&self) -> u32 {
        self.stale_ticks
    }

    pub fn observe(&mut self, job: &AuditJob) -> Tick {
        if job.status.is_terminal() {
            return Tick::Terminal;
        }
        let key = PhaseKey::of(job);
        if self.last.as_ref() != Some(&key) {
            self.last = Some(key);
            self.stale_ticks = 0;
            return Tick::Emit;
        }
        // Staleness is suspended while a representative audit is running.
        if job
            .current_step
            .as_ref()
            .map(CurrentStep::long_running)
            .unwrap_or(false)
        {
            return Tick::Quiet;
        }
        self.stale_ticks += 1;
        if self.stale_ticks >= self.limit {
            Tick::Stale
        } else {
            Tick::Quiet
        }
    }
}

/// Turns the persisted job state into a stream of progress events.
#[derive(Clone)]
pub struct ProgressStreamer {
    store: Store,
    full_site_interval: Duration,
    single_page_interval: Duration,
    stale_limit: u32,
}

impl ProgressStreamer {
    pub fn new(store: Store) -> Self {
        Self {
            store,
            full_site_interval: FULL_SITE_INTERVAL,
            single_page_interval: SINGLE_PAGE_INTERVAL,
            stale_limit: STALE_TICK_LIMIT,
        }
    }

    pub fn with_intervals(mut self, full_site: Duration, single_page: Duration) -> Self {
        self.full_site_interval = full_site;
        self.single_page_interval = single_page;
        self
    }

    pub fn with_stale_limit(mut self, limit: u32) -> Self {
        self.stale_limit = limit;
        self
    }

    fn interval_for(&self, mode: AuditMode) -> Duration {
        match mode {
            AuditMode::FullSite => self.full_site_interval,
            AuditMode::SinglePage => self.single_page_interval,
        }
    }

    /// Stream events for `job_id` until it is terminal.
    ///
    /// Dropping the stream cancels the poll loop at its next await point.
    pub fn stream(&self, job_id: &str) -> impl futures::Stream<Item = ProgressEvent> + Send + 'static {
        let this = self.clone();
        let job_id = job_id.to_string();

        async_stream::stream! {
            let mut tracker = StalenessTracker::new(this.stale_limit);
            let mut seq = 0u64;

            loop {
                let job = match this.store.find_job(&job_id) {
                    Ok(Some(job)) => job,
                    Ok(None) => {
                        debug!("progress: job {job_id} no longer exists");
                        break;
                    }
                    Err(e) => {
                        warn!("progress: cannot read job {job_id}: {e}");
                        break;
                    }
                };

                match tracker.observe(&job) {
                    Tick::Emit => {
                        seq += 1;
                        yield ProgressEvent::from_job(&job, seq);
                    }
                    Tick::Quiet => {}
                    Tick::Terminal => {
                        seq += 1;
                        yield ProgressEvent::from_job(&job, seq);
                        break;
                    }
                    Tick::Stale => {
                        let message = format!(
                            "No progress observed for {} consecutive polls",
                            tracker.stale_ticks()
                        );
                        warn!("progress: job {job_id} is stale, marking failed");
                        if let Err(e) = this.store.fail_job(&job_id, &message) {
                            warn!("progress: cannot fail job {job_id}: {e}");
                        }
                        if let Ok(Some(job)) = this.store.find_job(&job_id) {
                            seq += 1;
                            yield ProgressEvent::from_job(&job, seq);
                        }
                        break;
                    }
                }

                tokio::time::sleep(this.interval_for(job.mode)).await;
            }
        }
    }
}
