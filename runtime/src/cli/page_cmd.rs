//! `sitegauge page <url>`: audit a single page under one viewport.

use crate::cli::{print_json, Services};
use anyhow::{bail, Result};
use sitegauge::JobStatus;

pub async fn run(services: &Services, url: &str, viewport: &str) -> Result<()> {
    let job = services.jobs.create_page_audit(url, Some(viewport))?;
    eprintln!("job {} auditing {} at {viewport}", job.id, job.url);

    let finished = services.jobs.run_to_completion(&job.id).await?;
    print_json(&services.jobs.store().job_report(&finished.id)?)?;
    if finished.status == JobStatus::Failed {
        bail!(
            "audit failed: {}",
            finished.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
