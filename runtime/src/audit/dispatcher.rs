//! Template-level audit dispatch.
//!
//! A template that needs auditing has its representative page audited
//! under every required viewport; its rate is the mean of the viewports
//! that succeeded. A template that does not need auditing inherits the
//! most recent prior rate for the same structure.

use crate::audit::page_audit::PageAuditor;
use crate::pipeline::reporter::StepReporter;
use anyhow::Result;
use sitegauge::compliance::{self, catalog};
use sitegauge::{PageTemplate, RiskAccumulator, Store, Viewport};
use std::sync::Arc;
use tracing::{info, warn};

/// Result of auditing (or reusing) one template.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateOutcome {
    pub template_id: i64,
    pub compliance_rate: Option<f64>,
    pub violations: u32,
    pub viewports_audited: usize,
    pub reused_from_job: Option<String>,
}

pub struct AuditDispatcher {
    store: Store,
    auditor: Arc<PageAuditor>,
}

impl AuditDispatcher {
    pub fn new(store: Store, auditor: Arc<PageAuditor>) -> Self {
        Self { store, auditor }
    }

    /// Audit `template`'s representative under each required viewport.
    ///
    /// A viewport whose audit fails is skipped; when every viewport fails
    /// the template keeps a null rate.
    pub async fn audit_template(
        &self,
        job_id: &str,
        template: &PageTemplate,
        risk: &mut RiskAccumulator,
        reporter: &StepReporter,
    ) -> Result<TemplateOutcome> {
        let mut rates = Vec::new();
        let mut violations = 0u32;
        let criterion_total = catalog().len() as u32;

        for (idx, viewport) in Viewport::required().iter().enumerate() {
            reporter.full_site(|p| {
                p.viewport = Some(viewport.kind);
                p.viewport_index = idx as u32 + 1;
                p.criterion_index = 0;
                p.criterion_total = criterion_total;
                p.long_running = true;
            });

            let on_criterion = |index: u32, total: u32| {
                reporter.full_site(|p| {
                    p.criterion_index = index;
                    p.criterion_total = total;
                })
            };

            match self
                .auditor
                .audit(&template.representative_url, viewport, &on_criterion)
                .await
            {
                Ok(audit) => {
                    risk.record(&audit.criteria);
                    violations += audit.violation_count();
                    rates.push(audit.compliance_rate);
                    self.store
                        .insert_viewport_result(&audit.into_record(job_id, Some(template.id)))?;
                }
                Err(e) => warn!(
                    "skipping {} viewport for {}: {e:#}",
                    viewport.kind.as_str(),
                    template.representative_url
                ),
            }
        }

        reporter.full_site(|p| p.long_running = false);

        let rate = compliance::average(&rates);
        if let Some(rate) = rate {
            self.store.set_template_rate(template.id, rate)?;
        }
        info!(
            "template {} ({} pages): {} of {} viewports audited",
            template.representative_url,
            template.page_count,
            rates.len(),
            Viewport::required().len()
        );

        Ok(TemplateOutcome {
            template_id: template.id,
            compliance_rate: rate,
            violations,
            viewports_audited: rates.len(),
            reused_from_job: None,
        })
    }

    /// Carry the most recent prior rate forward for an unchanged template.
    ///
    /// The risk rollup and violation total take the evidence of the
    /// template whose viewport results produced that rate.
    pub fn reuse_template(
        &self,
        job_id: &str,
        domain: &str,
        template: &PageTemplate,
        risk: &mut RiskAccumulator,
    ) -> Result<TemplateOutcome> {
        let Some(prior) = self
            .store
            .prior_template(domain, &template.fingerprint, job_id)?
        else {
            return Ok(TemplateOutcome {
                template_id: template.id,
                compliance_rate: None,
                violations: 0,
                viewports_audited: 0,
                reused_from_job: None,
            });
        };

        self.store.reuse_template_rate(template.id, &prior)?;
        let evidence = self.store.template_evidence(prior.origin_template_id)?;
        risk.record_ids(evidence.non_compliant_criteria);

        Ok(TemplateOutcome {
            template_id: template.id,
            compliance_rate: Some(prior.compliance_rate),
            violations: evidence.violation_count,
            viewports_audited: 0,
            reused_from_job: Some(prior.job_id),
        })
    }
}
