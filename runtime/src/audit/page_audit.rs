//! One page audited under one viewport.

use crate::audit::classifier::{reduce_html, Classifier, ClassifierRequest, EXCERPT_LIMIT};
use crate::audit::detector::ViolationDetector;
use crate::config::NAVIGATION_TIMEOUT;
use crate::renderer::PageLoader;
use anyhow::{bail, Context, Result};
use sitegauge::compliance::{self, catalog};
use sitegauge::{CriterionResult, NewViewportResult, Viewport, Violation};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Called with `(criterion_index, criterion_total)` before each criterion.
pub type CriterionProgress<'a> = &'a (dyn Fn(u32, u32) + Send + Sync);

/// Outcome of auditing one page under one viewport.
#[derive(Debug, Clone)]
pub struct PageAudit {
    pub url: String,
    pub viewport: Viewport,
    pub violations: Vec<Violation>,
    pub criteria: Vec<CriterionResult>,
    pub compliance_rate: f64,
}

impl PageAudit {
    pub fn violation_count(&self) -> u32 {
        self.violations.len() as u32
    }

    pub fn into_record(self, job_id: &str, template_id: Option<i64>) -> NewViewportResult {
        let violation_count = self.violation_count();
        NewViewportResult {
            job_id: job_id.to_string(),
            template_id,
            viewport: self.viewport,
            url: self.url,
            compliance_rate: self.compliance_rate,
            violation_count,
            violations: serde_json::to_value(&self.violations)
                .unwrap_or_else(|_| serde_json::Value::Array(Vec::new())),
            criteria: self.criteria,
        }
    }
}

/// Loads a page, runs the detector, and resolves every catalog criterion.
pub struct PageAuditor {
    loader: PageLoader,
    detector: Arc<dyn ViolationDetector>,
    classifier: Option<Arc<dyn Classifier>>,
    navigation_timeout: Duration,
}

impl PageAuditor {
    pub fn new(
        loader: PageLoader,
        detector: Arc<dyn ViolationDetector>,
        classifier: Option<Arc<dyn Classifier>>,
    ) -> Self {
        Self {
            loader,
            detector,
            classifier,
            navigation_timeout: NAVIGATION_TIMEOUT,
        }
    }

    pub fn loader(&self) -> &PageLoader {
        &self.loader
    }

    /// Audit `url` under `viewport`.
    ///
    /// Criteria are resolved from detector evidence first, then by the
    /// classifier, and otherwise recorded as needing review. After the
    /// first classifier failure the rest of the page falls back directly.
    pub async fn audit(
        &self,
        url: &str,
        viewport: &Viewport,
        on_criterion: CriterionProgress<'_>,
    ) -> Result<PageAudit> {
        let page = self
            .loader
            .load(url, Some(viewport), self.navigation_timeout)
            .await?;
        if !page.is_success() {
            let status = page.status;
            page.close().await;
            bail!("{url} returned HTTP {status}");
        }

        let detected = self.detector.detect(&page).await;
        let html = page.html.clone();
        let final_url = page.final_url.clone();
        page.close().await;
        let violations = detected.with_context(|| format!("violation detection failed on {url}"))?;

        let (inapplicable, excerpt) = tokio::task::spawn_blocking(move || {
            (
                compliance::not_applicable(&html),
                reduce_html(&html, EXCERPT_LIMIT),
            )
        })
        .await
        .context("applicability check panicked")?;

        let total = catalog().len() as u32;
        let mut classifier = self.classifier.as_ref();
        let mut criteria = Vec::with_capacity(catalog().len());

        for (i, criterion) in catalog().iter().enumerate() {
            on_criterion(i as u32 + 1, total);

            if let Some(result) = compliance::resolve_automated(criterion, &violations, &inapplicable) {
                criteria.push(result);
                continue;
            }

            let Some(active) = classifier else {
                criteria.push(compliance::needs_review(
                    criterion,
                    "No automated evidence and no classifier available",
                ));
                continue;
            };

            let request = ClassifierRequest::new(criterion, &final_url, &excerpt);
            match active.classify(&request).await {
                Ok(verdict) => criteria.push(verdict.into_result(criterion.id)),
                Err(e) => {
                    warn!("classifier unavailable for {url}, falling back: {e:#}");
                    classifier = None;
                    criteria.push(compliance::needs_review(
                        criterion,
                        "Classifier unavailable; manual review required",
                    ));
                }
            }
        }

        let rate = compliance::compliance_rate(&criteria);
        debug!(
            "audited {url} at {}: {:.1}% with {} violations",
            viewport.kind.as_str(),
            rate,
            violations.len()
        );

        Ok(PageAudit {
            url: url.to_string(),
            viewport: *viewport,
            violations,
            criteria,
            compliance_rate: rate,
        })
    }
}
