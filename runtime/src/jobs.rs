//! Job service: validates audit requests, persists the job, and runs the
//! pipeline as a detached background task.

use crate::cartography::urls;
use crate::config::{clamp_depth, clamp_urls};
use crate::pipeline::Pipeline;
use sitegauge::{AuditJob, AuditMode, GaugeError, NewJob, Store, ViewportKind};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("invalid URL '{0}': expected an absolute http(s) URL")]
    InvalidUrl(String),

    #[error("unknown viewport '{0}': expected desktop, tablet, or mobile")]
    InvalidViewport(String),

    #[error(transparent)]
    Store(#[from] GaugeError),
}

#[derive(Clone)]
pub struct JobService {
    store: Store,
    pipeline: Arc<Pipeline>,
}

impl JobService {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            store: pipeline.store().clone(),
            pipeline,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Create a full-site job. Bounds are clamped to the supported range.
    pub fn create_site_audit(
        &self,
        url: &str,
        max_depth: u32,
        max_urls: u32,
    ) -> Result<AuditJob, JobError> {
        let (url, domain) = validate_url(url)?;
        let job = self.store.create_job(&NewJob {
            url,
            domain,
            mode: AuditMode::FullSite,
            max_depth: clamp_depth(max_depth),
            max_urls: clamp_urls(max_urls),
            viewport: None,
        })?;
        info!(
            "created full-site job {} for {} (depth {}, max {} URLs)",
            job.id, job.url, job.max_depth, job.max_urls
        );
        Ok(job)
    }

    /// Create a single-page job. The viewport defaults to desktop.
    pub fn create_page_audit(
        &self,
        url: &str,
        viewport: Option<&str>,
    ) -> Result<AuditJob, JobError> {
        let (url, domain) = validate_url(url)?;
        let viewport = match viewport {
            None => ViewportKind::Desktop,
            Some(name) => ViewportKind::parse(name)
                .ok_or_else(|| JobError::InvalidViewport(name.to_string()))?,
        };
        let job = self.store.create_job(&NewJob {
            url,
            domain,
            mode: AuditMode::SinglePage,
            max_depth: 1,
            max_urls: 1,
            viewport: Some(viewport),
        })?;
        info!(
            "created single-page job {} for {} at {}",
            job.id,
            job.url,
            viewport.as_str()
        );
        Ok(job)
    }

    /// Start a full-site audit and return the job without waiting for it.
    pub fn start_site_audit(
        &self,
        url: &str,
        max_depth: u32,
        max_urls: u32,
    ) -> Result<AuditJob, JobError> {
        let job = self.create_site_audit(url, max_depth, max_urls)?;
        self.spawn(&job.id);
        Ok(job)
    }

    /// Start a single-page audit and return the job without waiting for it.
    pub fn start_page_audit(&self, url: &str, viewport: Option<&str>) -> Result<AuditJob, JobError> {
        let job = self.create_page_audit(url, viewport)?;
        self.spawn(&job.id);
        Ok(job)
    }

    /// Run the job's pipeline on a detached task.
    ///
    /// A watcher task marks the job failed if the pipeline task panics or
    /// is cancelled before reaching a terminal state.
    pub fn spawn(&self, job_id: &str) -> JoinHandle<()> {
        let pipeline = Arc::clone(&self.pipeline);
        let id = job_id.to_string();
        let handle = tokio::spawn(async move { pipeline.run(&id).await });

        let store = self.store.clone();
        let id = job_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = handle.await {
                let message = if e.is_panic() {
                    "pipeline task panicked".to_string()
                } else {
                    "pipeline task was cancelled".to_string()
                };
                error!("job {id}: {message}");
                if let Err(store_err) = store.fail_job(&id, &message) {
                    error!("could not record failure of job {id}: {store_err}");
                }
            }
        })
    }

    /// Run the job's pipeline on the current task.
    pub async fn run_to_completion(&self, job_id: &str) -> Result<AuditJob, JobError> {
        self.pipeline.run(job_id).await;
        Ok(self.store.get_job(job_id)?)
    }
}

/// Parse and normalise an audit target, returning it with its domain.
fn validate_url(raw: &str) -> Result<(String, String), JobError> {
    let url = urls::parse_absolute(raw.trim()).ok_or_else(|| JobError::InvalidUrl(raw.to_string()))?;
    if url.host_str().is_none() {
        return Err(JobError::InvalidUrl(raw.to_string()));
    }
    let domain = urls::domain_of(&url);
    Ok((url.to_string(), domain))
}
