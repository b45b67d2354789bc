//! Audit pipeline: discovery, fingerprinting, clustering, and incremental
//! template audits for one job.
//!
//! A full-site job moves `discovering → clustering → auditing → completed`.
//! A single-page job goes straight to `auditing`. Any error that escapes a
//! stage is caught in [`Pipeline::run`] and recorded as `failed`.

pub mod reporter;

use crate::audit::dispatcher::AuditDispatcher;
use crate::audit::page_audit::PageAuditor;
use crate::cartography::discovery::{DiscoveryEngine, DiscoveryRequest};
use crate::config::NAVIGATION_TIMEOUT;
use crate::renderer::PageLoader;
use anyhow::{bail, Context, Result};
use futures::stream::{self, StreamExt};
use reporter::StepReporter;
use sitegauge::compliance::catalog;
use sitegauge::{
    analyze, cluster_pages, weighted_rate, AuditJob, AuditMode, ChangeSet, ClusterOptions,
    CurrentStep, FingerprintCache, FullSiteProgress, JobStatus, JobSummary, NewTemplate,
    PageSignature, PageStructure, RiskAccumulator, SinglePageProgress, Store, ViewportKind,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub cluster: ClusterOptions,
    /// Pages fingerprinted in parallel.
    pub render_concurrency: usize,
    /// Honour robots.txt and space crawl navigations.
    pub polite: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            cluster: ClusterOptions::default(),
            render_concurrency: 4,
            polite: true,
        }
    }
}

pub struct Pipeline {
    store: Store,
    loader: PageLoader,
    auditor: Arc<PageAuditor>,
    dispatcher: AuditDispatcher,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(store: Store, auditor: Arc<PageAuditor>, options: PipelineOptions) -> Self {
        Self {
            loader: auditor.loader().clone(),
            dispatcher: AuditDispatcher::new(store.clone(), Arc::clone(&auditor)),
            store,
            auditor,
            options,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Run the job to a terminal state.
    pub async fn run(&self, job_id: &str) {
        if let Err(e) = self.execute(job_id).await {
            let message = format!("{e:#}");
            error!("job {job_id} failed: {message}");
            match self.store.fail_job(job_id, &message) {
                Ok(true) => {}
                Ok(false) => warn!("job {job_id} was already terminal when it failed"),
                Err(store_err) => error!("could not record failure of job {job_id}: {store_err}"),
            }
        }
    }

    async fn execute(&self, job_id: &str) -> Result<()> {
        let job = self.store.get_job(job_id)?;
        match job.mode {
            AuditMode::FullSite => self.run_full_site(&job).await,
            AuditMode::SinglePage => self.run_single_page(&job).await,
        }
    }

    async fn run_full_site(&self, job: &AuditJob) -> Result<()> {
        let id = job.id.as_str();

        // discovering
        self.store.transition(id, JobStatus::Discovering)?;
        let reporter = StepReporter::new(
            self.store.clone(),
            id,
            CurrentStep::FullSite(FullSiteProgress::default()),
        );
        info!("job {id}: discovering pages at {}", job.url);

        let on_found = |n: u32| reporter.full_site(|p| p.discovered = n);
        let discovery = DiscoveryEngine::new(self.loader.clone())
            .discover_with_progress(
                &DiscoveryRequest {
                    base_url: job.url.clone(),
                    max_depth: job.max_depth,
                    max_urls: job.max_urls,
                    polite: self.options.polite,
                },
                &on_found,
            )
            .await?;
        if discovery.urls.is_empty() {
            bail!("no pages discovered at {}", job.url);
        }

        let mut page_ids = Vec::with_capacity(discovery.urls.len());
        for url in &discovery.urls {
            page_ids.push(self.store.insert_page(id, url)?);
        }
        let discovered = discovery.urls.len() as u32;
        self.store.set_discovery(id, discovery.method, discovered)?;
        reporter.full_site(|p| p.discovered = discovered);
        info!(
            "job {id}: {discovered} pages via {}",
            discovery.method.as_str()
        );

        // clustering
        self.store.transition(id, JobStatus::Clustering)?;
        let structures = self
            .fingerprint_pages(&discovery.urls, &discovery.prefetched, &reporter)
            .await;

        let cache = FingerprintCache::new(self.store.load_hash_cache(&job.domain)?);
        let changes = ChangeSet::compute(
            discovery
                .urls
                .iter()
                .zip(&structures)
                .map(|(url, s)| (url.as_str(), s.as_ref().map(|s| s.fingerprint.as_str()))),
            &cache,
        );
        for ((page_id, url), s) in page_ids.iter().zip(&discovery.urls).zip(&structures) {
            self.store.set_page_fingerprint(
                *page_id,
                s.as_ref().map(|s| s.fingerprint.as_str()),
                changes.is_changed(url),
            )?;
        }

        let signatures: Vec<PageSignature> = discovery
            .urls
            .iter()
            .zip(&structures)
            .map(|(url, s)| PageSignature {
                url: url.clone(),
                fingerprint: s.as_ref().map(|s| s.fingerprint.clone()),
                paths: s.as_ref().map(|s| s.paths.clone()),
            })
            .collect();
        let clusters = cluster_pages(&signatures, &self.options.cluster);

        for cluster in &clusters {
            let template_id = self.store.insert_template(
                id,
                &NewTemplate {
                    fingerprint: cluster.fingerprint.clone(),
                    page_count: cluster.page_count() as u32,
                    representative_url: cluster.representative_url.clone(),
                    sample_paths: cluster.sample_paths.clone(),
                    needs_audit: changes.needs_audit(cluster),
                },
            )?;
            for url in &cluster.member_urls {
                self.store.assign_template(id, url, template_id)?;
            }
        }

        let templates = self.store.list_templates(id)?;
        let pending = templates.iter().filter(|t| t.needs_audit).count() as u32;
        let templates_count = templates.len() as u32;
        reporter.full_site(|p| {
            p.templates = templates_count;
            p.skipped = templates_count - pending;
        });
        info!(
            "job {id}: {templates_count} templates, {pending} changed, {} of {discovered} pages changed",
            changes.changed_count()
        );

        // auditing
        self.store.transition(id, JobStatus::Auditing)?;
        let mut risk = RiskAccumulator::new();
        let mut total_violations = 0u32;
        let mut audited = 0u32;
        let mut skipped = 0u32;

        for (idx, template) in templates.iter().enumerate() {
            if self.is_terminal(id)? {
                warn!("job {id}: ended externally, abandoning remaining templates");
                return Ok(());
            }
            if !template.needs_audit {
                skipped += 1;
                if template.fingerprint == sitegauge::cluster::UNRESOLVED_FINGERPRINT {
                    continue;
                }
                let outcome =
                    self.dispatcher
                        .reuse_template(id, &job.domain, template, &mut risk)?;
                total_violations += outcome.violations;
                continue;
            }

            let name = display_path(&template.representative_url);
            reporter.full_site(|p| {
                p.template_index = idx as u32 + 1;
                p.template_name = Some(name);
            });
            let outcome = self
                .dispatcher
                .audit_template(id, template, &mut risk, &reporter)
                .await?;
            total_violations += outcome.violations;
            if outcome.viewports_audited > 0 {
                audited += 1;
            }
            reporter.full_site(|p| p.audited = audited);
        }

        // aggregate
        let final_templates = self.store.list_templates(id)?;
        let rate = weighted_rate(
            final_templates
                .iter()
                .map(|t| (t.page_count, t.compliance_rate)),
        );

        for (url, s) in discovery.urls.iter().zip(&structures) {
            if let Some(s) = s {
                self.store
                    .upsert_hash_cache(&job.domain, url, &s.fingerprint, id)?;
            }
        }

        self.store.finish_job(
            id,
            &JobSummary {
                compliance_rate: rate,
                total_violations,
                risk: Some(risk.rollup()),
                templates_count,
                templates_audited: audited,
                templates_skipped: skipped,
            },
        )?;
        info!(
            "job {id}: completed, {audited} audited, {skipped} skipped, rate {}",
            rate.map(|r| format!("{r:.1}%"))
                .unwrap_or_else(|| "n/a".to_string())
        );
        Ok(())
    }

    /// A job failed by the progress streamer, or finished elsewhere, is no
    /// longer ours to advance.
    fn is_terminal(&self, job_id: &str) -> Result<bool> {
        Ok(self.store.get_job(job_id)?.status.is_terminal())
    }

    /// Fingerprint every URL with bounded parallelism. Pages rendered during
    /// discovery are analyzed from `prefetched` without another load.
    /// Results keep input order; a page that cannot be loaded yields `None`.
    async fn fingerprint_pages(
        &self,
        urls: &[String],
        prefetched: &HashMap<String, String>,
        reporter: &StepReporter,
    ) -> Vec<Option<PageStructure>> {
        let loader = self.loader.clone();
        let work: Vec<(String, Option<String>)> = urls
            .iter()
            .map(|url| (url.clone(), prefetched.get(url).cloned()))
            .collect();
        let mut pending = stream::iter(work)
            .map(move |(url, html)| {
                let loader = loader.clone();
                async move {
                    match html {
                        Some(html) => analyze_html(html).await,
                        None => fingerprint_page(&loader, &url).await,
                    }
                }
            })
            .buffered(self.options.render_concurrency.max(1));

        let mut out = Vec::with_capacity(urls.len());
        let mut done = 0u32;
        while let Some(structure) = pending.next().await {
            done += 1;
            reporter.full_site(|p| p.fingerprinted = done);
            out.push(structure);
        }
        out
    }

    async fn run_single_page(&self, job: &AuditJob) -> Result<()> {
        let id = job.id.as_str();
        self.store.transition(id, JobStatus::Auditing)?;

        let viewport = job.viewport.unwrap_or(ViewportKind::Desktop).viewport();
        let reporter = StepReporter::new(
            self.store.clone(),
            id,
            CurrentStep::SinglePage(SinglePageProgress {
                viewport: Some(viewport.kind),
                criterion_index: 0,
                criterion_total: catalog().len() as u32,
                long_running: true,
            }),
        );
        info!(
            "job {id}: auditing {} at {}",
            job.url,
            viewport.kind.as_str()
        );

        let on_criterion = |index: u32, total: u32| {
            reporter.single_page(|p| {
                p.criterion_index = index;
                p.criterion_total = total;
            })
        };
        let audit = self
            .auditor
            .audit(&job.url, &viewport, &on_criterion)
            .await
            .with_context(|| format!("auditing {}", job.url))?;
        reporter.single_page(|p| p.long_running = false);

        let mut risk = RiskAccumulator::new();
        risk.record(&audit.criteria);
        let rate = audit.compliance_rate;
        let total_violations = audit.violation_count();
        self.store
            .insert_viewport_result(&audit.into_record(id, None))?;

        self.store.finish_job(
            id,
            &JobSummary {
                compliance_rate: Some(rate),
                total_violations,
                risk: Some(risk.rollup()),
                ..Default::default()
            },
        )?;
        info!("job {id}: completed, rate {rate:.1}%");
        Ok(())
    }
}

async fn fingerprint_page(loader: &PageLoader, url: &str) -> Option<PageStructure> {
    let desktop = ViewportKind::Desktop.viewport();
    let page = match loader.load(url, Some(&desktop), NAVIGATION_TIMEOUT).await {
        Ok(page) => page,
        Err(e) => {
            warn!("fingerprint: skipping {url}: {e:#}");
            return None;
        }
    };
    if !page.is_success() {
        warn!("fingerprint: skipping {url}: HTTP {}", page.status);
        page.close().await;
        return None;
    }
    let html = page.html.clone();
    page.close().await;
    analyze_html(html).await
}

async fn analyze_html(html: String) -> Option<PageStructure> {
    tokio::task::spawn_blocking(move || analyze(&html))
        .await
        .ok()
}

fn display_path(url: &str) -> String {
    url::Url::parse(url)
        .map(|u| u.path().to_string())
        .unwrap_or_else(|_| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_path() {
        assert_eq!(display_path("https://example.com/blog/post-1"), "/blog/post-1");
        assert_eq!(display_path("https://example.com"), "/");
        assert_eq!(display_path("not a url"), "not a url");
    }
}
