//! `sitegauge audit <url>`: run a full-site audit in the foreground.

use crate::cli::{follow_progress, print_json, Services};
use anyhow::{bail, Result};
use sitegauge::JobStatus;

pub async fn run(services: &Services, url: &str, max_depth: u32, max_urls: u32) -> Result<()> {
    let job = services.jobs.create_site_audit(url, max_depth, max_urls)?;
    eprintln!(
        "job {} auditing {} (depth {}, up to {} URLs)",
        job.id, job.url, job.max_depth, job.max_urls
    );

    let progress = follow_progress(services.jobs.store(), &job.id);
    let finished = services.jobs.run_to_completion(&job.id).await?;
    progress.abort();

    print_json(&services.jobs.store().job_report(&finished.id)?)?;
    if finished.status == JobStatus::Failed {
        bail!(
            "audit failed: {}",
            finished.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
