//! SQLite-backed store for jobs, pages, templates, audit results, and the
//! cross-run fingerprint cache.
//!
//! Every write is a single-row insert or update except viewport results,
//! which are appended together with their criterion rows in one
//! transaction. Results are only ever removed by deleting their job.

use crate::types::*;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Maximum number of characters kept from a job's failure message.
pub const ERROR_MESSAGE_LIMIT: usize = 500;

const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    url TEXT NOT NULL,
    domain TEXT NOT NULL,
    mode TEXT NOT NULL,
    status TEXT NOT NULL,
    max_depth INTEGER NOT NULL,
    max_urls INTEGER NOT NULL,
    viewport TEXT,
    discovery_method TEXT,
    compliance_rate REAL,
    total_violations INTEGER NOT NULL DEFAULT 0,
    risk_json TEXT,
    pages_discovered INTEGER NOT NULL DEFAULT 0,
    templates_count INTEGER NOT NULL DEFAULT 0,
    templates_audited INTEGER NOT NULL DEFAULT 0,
    templates_skipped INTEGER NOT NULL DEFAULT 0,
    current_step_json TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_jobs_domain ON jobs(domain, created_at);

CREATE TABLE IF NOT EXISTS pages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    url TEXT NOT NULL,
    fingerprint TEXT,
    changed INTEGER NOT NULL DEFAULT 1,
    template_id INTEGER REFERENCES templates(id) ON DELETE SET NULL,
    UNIQUE(job_id, url)
);

CREATE TABLE IF NOT EXISTS templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    fingerprint TEXT NOT NULL,
    page_count INTEGER NOT NULL,
    representative_url TEXT NOT NULL,
    sample_paths_json TEXT NOT NULL,
    compliance_rate REAL,
    needs_audit INTEGER NOT NULL,
    reused_from_job TEXT,
    origin_template_id INTEGER
);
CREATE INDEX IF NOT EXISTS idx_templates_fingerprint ON templates(fingerprint);

CREATE TABLE IF NOT EXISTS viewport_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
    template_id INTEGER REFERENCES templates(id) ON DELETE CASCADE,
    viewport TEXT NOT NULL,
    width INTEGER NOT NULL,
    height INTEGER NOT NULL,
    url TEXT NOT NULL,
    compliance_rate REAL NOT NULL,
    violation_count INTEGER NOT NULL,
    violations_json TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS criterion_results (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    viewport_result_id INTEGER NOT NULL REFERENCES viewport_results(id) ON DELETE CASCADE,
    criterion_id TEXT NOT NULL,
    status TEXT NOT NULL,
    confidence INTEGER NOT NULL,
    reasoning TEXT NOT NULL,
    issues_json TEXT NOT NULL,
    recommendations_json TEXT NOT NULL,
    method TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS page_hash_cache (
    domain TEXT NOT NULL,
    url TEXT NOT NULL,
    fingerprint TEXT NOT NULL,
    job_id TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    PRIMARY KEY(domain, url)
);
"#;

const JOB_COLUMNS: &str = "id, url, domain, mode, status, max_depth, max_urls, viewport, \
     discovery_method, compliance_rate, total_violations, risk_json, pages_discovered, \
     templates_count, templates_audited, templates_skipped, current_step_json, error, \
     created_at, updated_at, completed_at";

const TEMPLATE_COLUMNS: &str = "id, job_id, fingerprint, page_count, representative_url, \
     sample_paths_json, compliance_rate, needs_audit, reused_from_job";

/// Template from an earlier job whose rate can be carried forward.
#[derive(Debug, Clone, PartialEq)]
pub struct PriorTemplate {
    pub job_id: String,
    pub template_id: i64,
    /// Template that actually holds the viewport results behind the rate.
    pub origin_template_id: i64,
    pub compliance_rate: f64,
}

/// Persisted evidence behind an audited template.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TemplateEvidence {
    pub non_compliant_criteria: Vec<String>,
    pub violation_count: u32,
}

/// Transactional store shared by the pipeline, the job service, and the
/// progress streamer.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Open (or create) a database file.
    pub fn open(path: &Path) -> GaugeResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    GaugeError::Storage(format!("cannot create {}: {e}", parent.display()))
                })?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Self::init(conn)
    }

    /// In-memory database, used by tests and one-shot CLI runs.
    pub fn memory() -> GaugeResult<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> GaugeResult<Self> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(DDL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> GaugeResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| GaugeError::Storage("connection lock poisoned".to_string()))
    }

    // jobs

    pub fn create_job(&self, new: &NewJob) -> GaugeResult<AuditJob> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now();
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO jobs(id, url, domain, mode, status, max_depth, max_urls, viewport,
                                  created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    id,
                    new.url,
                    new.domain,
                    new.mode.as_str(),
                    JobStatus::Pending.as_str(),
                    new.max_depth,
                    new.max_urls,
                    new.viewport.map(|v| v.as_str()),
                    now,
                ],
            )?;
        }
        self.get_job(&id)
    }

    pub fn find_job(&self, id: &str) -> GaugeResult<Option<AuditJob>> {
        let conn = self.lock()?;
        let job = conn
            .query_row(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![id],
                row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    pub fn get_job(&self, id: &str) -> GaugeResult<AuditJob> {
        self.find_job(id)?
            .ok_or_else(|| GaugeError::JobNotFound(id.to_string()))
    }

    /// Most recent jobs first.
    pub fn list_jobs(&self, limit: usize) -> GaugeResult<Vec<AuditJob>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, rowid DESC LIMIT ?1"
        ))?;
        let jobs = stmt
            .query_map(params![limit as i64], row_to_job)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(jobs)
    }

    /// Move a job to `next`, rejecting backward moves and exits from a
    /// terminal state. Re-entering the current state is a no-op.
    pub fn transition(&self, id: &str, next: JobStatus) -> GaugeResult<()> {
        let conn = self.lock()?;
        let current = current_status(&conn, id)?;
        if current == next {
            return Ok(());
        }
        if !current.can_transition_to(next) {
            return Err(GaugeError::InvalidTransition {
                from: current,
                to: next,
            });
        }
        conn.execute(
            "UPDATE jobs SET status = ?1, updated_at = ?2 WHERE id = ?3",
            params![next.as_str(), now(), id],
        )?;
        Ok(())
    }

    /// Force a job into `failed`, keeping a truncated copy of `message`.
    ///
    /// Returns `false` without touching the row when the job already
    /// reached a terminal state.
    pub fn fail_job(&self, id: &str, message: &str) -> GaugeResult<bool> {
        let conn = self.lock()?;
        let current = current_status(&conn, id)?;
        if current.is_terminal() {
            return Ok(false);
        }
        let message: String = message.chars().take(ERROR_MESSAGE_LIMIT).collect();
        let now = now();
        conn.execute(
            "UPDATE jobs SET status = ?1, error = ?2, updated_at = ?3, completed_at = ?3
             WHERE id = ?4",
            params![JobStatus::Failed.as_str(), message, now, id],
        )?;
        Ok(true)
    }

    pub fn set_current_step(&self, id: &str, step: &CurrentStep) -> GaugeResult<()> {
        let json = serde_json::to_string(step)?;
        let conn = self.lock()?;
        conn.execute(
            "UPDATE jobs SET current_step_json = ?1, updated_at = ?2 WHERE id = ?3",
            params![json, now(), id],
        )?;
        Ok(())
    }

    pub fn set_discovery(
        &self,
        id: &str,
        method: DiscoveryMethod,
        pages_discovered: u32,
    ) -> GaugeResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE jobs SET discovery_method = ?1, pages_discovered = ?2, updated_at = ?3
             WHERE id = ?4",
            params![method.as_str(), pages_discovered, now(), id],
        )?;
        Ok(())
    }

    /// Record final figures and mark the job completed.
    pub fn finish_job(&self, id: &str, summary: &JobSummary) -> GaugeResult<()> {
        let risk = summary.risk.as_ref().map(serde_json::to_string).transpose()?;
        let conn = self.lock()?;
        let current = current_status(&conn, id)?;
        if !current.can_transition_to(JobStatus::Completed) {
            return Err(GaugeError::InvalidTransition {
                from: current,
                to: JobStatus::Completed,
            });
        }
        let now = now();
        conn.execute(
            "UPDATE jobs SET status = ?1, compliance_rate = ?2, total_violations = ?3,
                    risk_json = ?4, templates_count = ?5, templates_audited = ?6,
                    templates_skipped = ?7, updated_at = ?8, completed_at = ?8
             WHERE id = ?9",
            params![
                JobStatus::Completed.as_str(),
                summary.compliance_rate,
                summary.total_violations,
                risk,
                summary.templates_count,
                summary.templates_audited,
                summary.templates_skipped,
                now,
                id,
            ],
        )?;
        Ok(())
    }

    /// Returns whether a job was removed. Dependent rows cascade.
    pub fn delete_job(&self, id: &str) -> GaugeResult<bool> {
        let conn = self.lock()?;
        let rows = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // pages

    pub fn insert_page(&self, job_id: &str, url: &str) -> GaugeResult<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pages(job_id, url) VALUES (?1, ?2)
             ON CONFLICT(job_id, url) DO NOTHING",
            params![job_id, url],
        )?;
        let id = conn.query_row(
            "SELECT id FROM pages WHERE job_id = ?1 AND url = ?2",
            params![job_id, url],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    pub fn set_page_fingerprint(
        &self,
        page_id: i64,
        fingerprint: Option<&str>,
        changed: bool,
    ) -> GaugeResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE pages SET fingerprint = ?1, changed = ?2 WHERE id = ?3",
            params![fingerprint, changed, page_id],
        )?;
        Ok(())
    }

    pub fn assign_template(&self, job_id: &str, url: &str, template_id: i64) -> GaugeResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE pages SET template_id = ?1 WHERE job_id = ?2 AND url = ?3",
            params![template_id, job_id, url],
        )?;
        Ok(())
    }

    pub fn list_pages(&self, job_id: &str) -> GaugeResult<Vec<DiscoveredPage>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, url, fingerprint, changed, template_id
             FROM pages WHERE job_id = ?1 ORDER BY id",
        )?;
        let pages = stmt
            .query_map(params![job_id], |row| {
                Ok(DiscoveredPage {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    url: row.get(2)?,
                    fingerprint: row.get(3)?,
                    changed: row.get(4)?,
                    template_id: row.get(5)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(pages)
    }

    // templates

    pub fn insert_template(&self, job_id: &str, new: &NewTemplate) -> GaugeResult<i64> {
        let samples = serde_json::to_string(&new.sample_paths)?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO templates(job_id, fingerprint, page_count, representative_url,
                                   sample_paths_json, needs_audit)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                job_id,
                new.fingerprint,
                new.page_count,
                new.representative_url,
                samples,
                new.needs_audit,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Write the rate of a template audited in this job.
    pub fn set_template_rate(&self, template_id: i64, rate: f64) -> GaugeResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE templates SET compliance_rate = ?1, origin_template_id = id WHERE id = ?2",
            params![rate, template_id],
        )?;
        Ok(())
    }

    /// Carry a prior job's rate over to an unchanged template.
    pub fn reuse_template_rate(&self, template_id: i64, prior: &PriorTemplate) -> GaugeResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "UPDATE templates SET compliance_rate = ?1, reused_from_job = ?2,
                    origin_template_id = ?3
             WHERE id = ?4",
            params![
                prior.compliance_rate,
                prior.job_id,
                prior.origin_template_id,
                template_id
            ],
        )?;
        Ok(())
    }

    pub fn list_templates(&self, job_id: &str) -> GaugeResult<Vec<PageTemplate>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE job_id = ?1 ORDER BY id"
        ))?;
        let templates = stmt
            .query_map(params![job_id], row_to_template)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(templates)
    }

    /// Most recent template with `fingerprint` and a known rate from
    /// another job on `domain`. Ties on creation time go to the job
    /// inserted last.
    pub fn prior_template(
        &self,
        domain: &str,
        fingerprint: &str,
        exclude_job: &str,
    ) -> GaugeResult<Option<PriorTemplate>> {
        let conn = self.lock()?;
        let prior = conn
            .query_row(
                "SELECT t.job_id, t.id, COALESCE(t.origin_template_id, t.id), t.compliance_rate
                 FROM templates t JOIN jobs j ON j.id = t.job_id
                 WHERE j.domain = ?1 AND t.fingerprint = ?2 AND j.id != ?3
                   AND t.compliance_rate IS NOT NULL
                 ORDER BY j.created_at DESC, j.rowid DESC, t.id DESC
                 LIMIT 1",
                params![domain, fingerprint, exclude_job],
                |row| {
                    Ok(PriorTemplate {
                        job_id: row.get(0)?,
                        template_id: row.get(1)?,
                        origin_template_id: row.get(2)?,
                        compliance_rate: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(prior)
    }

    /// Distinct non-compliant criteria and total violations recorded for a
    /// template across its viewports.
    pub fn template_evidence(&self, template_id: i64) -> GaugeResult<TemplateEvidence> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT c.criterion_id
             FROM criterion_results c JOIN viewport_results v ON v.id = c.viewport_result_id
             WHERE v.template_id = ?1 AND c.status = ?2
             ORDER BY c.criterion_id",
        )?;
        let non_compliant_criteria = stmt
            .query_map(
                params![template_id, CriterionStatus::NonCompliant.as_str()],
                |row| row.get(0),
            )?
            .collect::<Result<Vec<String>, _>>()?;
        let violation_count: i64 = conn.query_row(
            "SELECT COALESCE(SUM(violation_count), 0) FROM viewport_results WHERE template_id = ?1",
            params![template_id],
            |row| row.get(0),
        )?;
        Ok(TemplateEvidence {
            non_compliant_criteria,
            violation_count: violation_count.max(0) as u32,
        })
    }

    // viewport results

    pub fn insert_viewport_result(&self, new: &NewViewportResult) -> GaugeResult<i64> {
        let violations = serde_json::to_string(&new.violations)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO viewport_results(job_id, template_id, viewport, width, height, url,
                                          compliance_rate, violation_count, violations_json,
                                          created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                new.job_id,
                new.template_id,
                new.viewport.kind.as_str(),
                new.viewport.width,
                new.viewport.height,
                new.url,
                new.compliance_rate,
                new.violation_count,
                violations,
                now(),
            ],
        )?;
        let id = tx.last_insert_rowid();
        for c in &new.criteria {
            tx.execute(
                "INSERT INTO criterion_results(viewport_result_id, criterion_id, status,
                                               confidence, reasoning, issues_json,
                                               recommendations_json, method)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    id,
                    c.criterion_id,
                    c.status.as_str(),
                    c.confidence,
                    c.reasoning,
                    serde_json::to_string(&c.issues)?,
                    serde_json::to_string(&c.recommendations)?,
                    c.method.as_str(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(id)
    }

    pub fn list_viewport_results(&self, job_id: &str) -> GaugeResult<Vec<ViewportResult>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, job_id, template_id, viewport, width, height, url, compliance_rate,
                    violation_count, violations_json, created_at
             FROM viewport_results WHERE job_id = ?1 ORDER BY id",
        )?;
        let mut results = stmt
            .query_map(params![job_id], |row| {
                let viewport: String = row.get(3)?;
                let violations: String = row.get(9)?;
                Ok(ViewportResult {
                    id: row.get(0)?,
                    job_id: row.get(1)?,
                    template_id: row.get(2)?,
                    viewport: parse_col(3, &viewport, ViewportKind::parse)?,
                    width: row.get(4)?,
                    height: row.get(5)?,
                    url: row.get(6)?,
                    compliance_rate: row.get(7)?,
                    violation_count: row.get(8)?,
                    violations: json_col(9, &violations)?,
                    criteria: Vec::new(),
                    created_at: row.get(10)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut crit = conn.prepare(
            "SELECT criterion_id, status, confidence, reasoning, issues_json,
                    recommendations_json, method
             FROM criterion_results WHERE viewport_result_id = ?1 ORDER BY id",
        )?;
        for result in &mut results {
            result.criteria = crit
                .query_map(params![result.id], row_to_criterion)?
                .collect::<Result<Vec<_>, _>>()?;
        }
        Ok(results)
    }

    /// Full nested view of a job.
    pub fn job_report(&self, id: &str) -> GaugeResult<JobReport> {
        let job = self.get_job(id)?;
        let mut viewports = self.list_viewport_results(id)?;
        let templates = self
            .list_templates(id)?
            .into_iter()
            .map(|template| {
                let (own, rest): (Vec<_>, Vec<_>) = std::mem::take(&mut viewports)
                    .into_iter()
                    .partition(|v| v.template_id == Some(template.id));
                viewports = rest;
                TemplateReport {
                    template,
                    viewports: own,
                }
            })
            .collect();
        let pages = self.list_pages(id)?;
        Ok(JobReport {
            job,
            templates,
            viewports,
            pages,
        })
    }

    // fingerprint cache

    pub fn load_hash_cache(&self, domain: &str) -> GaugeResult<Vec<PageHashCacheEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT domain, url, fingerprint, job_id, updated_at
             FROM page_hash_cache WHERE domain = ?1 ORDER BY url",
        )?;
        let entries = stmt
            .query_map(params![domain], |row| {
                Ok(PageHashCacheEntry {
                    domain: row.get(0)?,
                    url: row.get(1)?,
                    fingerprint: row.get(2)?,
                    job_id: row.get(3)?,
                    updated_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn upsert_hash_cache(
        &self,
        domain: &str,
        url: &str,
        fingerprint: &str,
        job_id: &str,
    ) -> GaugeResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO page_hash_cache(domain, url, fingerprint, job_id, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(domain, url) DO UPDATE SET
                fingerprint = excluded.fingerprint,
                job_id = excluded.job_id,
                updated_at = excluded.updated_at",
            params![domain, url, fingerprint, job_id, now()],
        )?;
        Ok(())
    }
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn now() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn current_status(conn: &Connection, id: &str) -> GaugeResult<JobStatus> {
    let status: Option<String> = conn
        .query_row(
            "SELECT status FROM jobs WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    let status = status.ok_or_else(|| GaugeError::JobNotFound(id.to_string()))?;
    JobStatus::parse(&status)
        .ok_or_else(|| GaugeError::Storage(format!("unknown job status '{status}'")))
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn parse_col<T>(idx: usize, value: &str, parse: fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parse(value).ok_or_else(|| conversion_error(idx, format!("unexpected value '{value}'")))
}

fn json_col<T: serde::de::DeserializeOwned>(idx: usize, value: &str) -> rusqlite::Result<T> {
    serde_json::from_str(value).map_err(|e| conversion_error(idx, e.to_string()))
}

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<AuditJob> {
    let mode: String = row.get(3)?;
    let status: String = row.get(4)?;
    let viewport: Option<String> = row.get(7)?;
    let method: Option<String> = row.get(8)?;
    let risk: Option<String> = row.get(11)?;
    let step: Option<String> = row.get(16)?;

    Ok(AuditJob {
        id: row.get(0)?,
        url: row.get(1)?,
        domain: row.get(2)?,
        mode: parse_col(3, &mode, AuditMode::parse)?,
        status: parse_col(4, &status, JobStatus::parse)?,
        max_depth: row.get(5)?,
        max_urls: row.get(6)?,
        viewport: viewport
            .map(|v| parse_col(7, &v, ViewportKind::parse))
            .transpose()?,
        discovery_method: method
            .map(|m| parse_col(8, &m, DiscoveryMethod::parse))
            .transpose()?,
        compliance_rate: row.get(9)?,
        total_violations: row.get(10)?,
        risk: risk.map(|r| json_col(11, &r)).transpose()?,
        pages_discovered: row.get(12)?,
        templates_count: row.get(13)?,
        templates_audited: row.get(14)?,
        templates_skipped: row.get(15)?,
        current_step: step.map(|s| json_col(16, &s)).transpose()?,
        error: row.get(17)?,
        created_at: row.get(18)?,
        updated_at: row.get(19)?,
        completed_at: row.get(20)?,
    })
}

fn row_to_template(row: &Row<'_>) -> rusqlite::Result<PageTemplate> {
    let samples: String = row.get(5)?;
    Ok(PageTemplate {
        id: row.get(0)?,
        job_id: row.get(1)?,
        fingerprint: row.get(2)?,
        page_count: row.get(3)?,
        representative_url: row.get(4)?,
        sample_paths: json_col(5, &samples)?,
        compliance_rate: row.get(6)?,
        needs_audit: row.get(7)?,
        reused_from_job: row.get(8)?,
    })
}

fn row_to_criterion(row: &Row<'_>) -> rusqlite::Result<CriterionResult> {
    let status: String = row.get(1)?;
    let issues: String = row.get(4)?;
    let recommendations: String = row.get(5)?;
    let method: String = row.get(6)?;
    Ok(CriterionResult {
        criterion_id: row.get(0)?,
        status: parse_col(1, &status, CriterionStatus::parse)?,
        confidence: row.get(2)?,
        reasoning: row.get(3)?,
        issues: json_col(4, &issues)?,
        recommendations: json_col(5, &recommendations)?,
        method: parse_col(6, &method, TestMethod::parse)?,
    })
}
