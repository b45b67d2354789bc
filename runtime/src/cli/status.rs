//! `sitegauge status <job-id>`: show a stored job.

use crate::cli::print_json;
use anyhow::{Context, Result};
use serde_json::json;
use sitegauge::Store;
use std::path::Path;

/// Print the full report for a finished job, or its live step otherwise.
pub fn run(db_path: &Path, job_id: &str) -> Result<()> {
    let store = Store::open(db_path)
        .with_context(|| format!("cannot open database {}", db_path.display()))?;
    let job = store
        .find_job(job_id)?
        .with_context(|| format!("no audit job with id {job_id}"))?;

    if job.status.is_terminal() {
        return print_json(&store.job_report(job_id)?);
    }
    print_json(&json!({
        "id": job.id,
        "url": job.url,
        "mode": job.mode,
        "status": job.status,
        "pages_discovered": job.pages_discovered,
        "current_step": job.current_step,
        "updated_at": job.updated_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitegauge::{AuditMode, NewJob, ViewportKind};

    #[test]
    fn test_status_reads_file_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sitegauge.db");
        let store = Store::open(&path).unwrap();
        let job = store
            .create_job(&NewJob {
                url: "https://example.com/".to_string(),
                domain: "example.com".to_string(),
                mode: AuditMode::SinglePage,
                max_depth: 1,
                max_urls: 1,
                viewport: Some(ViewportKind::Desktop),
            })
            .unwrap();
        drop(store);

        assert!(run(&path, &job.id).is_ok());
        assert!(run(&path, "missing").is_err());
    }
}
