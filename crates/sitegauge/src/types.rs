//! Core data types for audit jobs, templates, and per-viewport results.

use serde::{Deserialize, Serialize};

/// How much of a site an audit job covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditMode {
    SinglePage,
    FullSite,
}

impl AuditMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SinglePage => "single-page",
            Self::FullSite => "full-site",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "single-page" => Some(Self::SinglePage),
            "full-site" => Some(Self::FullSite),
            _ => None,
        }
    }
}

/// Lifecycle of an audit job.
///
/// Status only moves forward; `Failed` can be entered from any
/// non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Discovering,
    Clustering,
    Auditing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Discovering => "discovering",
            Self::Clustering => "clustering",
            Self::Auditing => "auditing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "discovering" => Some(Self::Discovering),
            "clustering" => Some(Self::Clustering),
            "auditing" => Some(Self::Auditing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Position in the forward state machine.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Discovering => 1,
            Self::Clustering => 2,
            Self::Auditing => 3,
            Self::Completed => 4,
            Self::Failed => 5,
        }
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// Re-entering the current state is accepted as a no-op.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return *self == next;
        }
        if next == Self::Failed {
            return true;
        }
        next.rank() >= self.rank()
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where the discovered URL list came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    Sitemap,
    Robots,
    Crawl,
}

impl DiscoveryMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sitemap => "sitemap",
            Self::Robots => "robots",
            Self::Crawl => "crawl",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sitemap" => Some(Self::Sitemap),
            "robots" => Some(Self::Robots),
            "crawl" => Some(Self::Crawl),
            _ => None,
        }
    }
}

/// Named screen size a page is audited under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViewportKind {
    Desktop,
    Tablet,
    Mobile,
}

impl ViewportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::Tablet => "tablet",
            Self::Mobile => "mobile",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "desktop" => Some(Self::Desktop),
            "tablet" => Some(Self::Tablet),
            "mobile" => Some(Self::Mobile),
            _ => None,
        }
    }

    pub fn viewport(&self) -> Viewport {
        match self {
            Self::Desktop => Viewport {
                kind: Self::Desktop,
                width: 1920,
                height: 1080,
            },
            Self::Tablet => Viewport {
                kind: Self::Tablet,
                width: 768,
                height: 1024,
            },
            Self::Mobile => Viewport {
                kind: Self::Mobile,
                width: 375,
                height: 667,
            },
        }
    }
}

/// Concrete viewport dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    pub kind: ViewportKind,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Ordered list of viewports every template is audited under.
    pub fn required() -> [Viewport; 3] {
        [
            ViewportKind::Desktop.viewport(),
            ViewportKind::Tablet.viewport(),
            ViewportKind::Mobile.viewport(),
        ]
    }

    pub fn is_mobile(&self) -> bool {
        self.kind == ViewportKind::Mobile
    }
}

/// Outcome of a single accessibility criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriterionStatus {
    Compliant,
    NonCompliant,
    NotApplicable,
    NeedsReview,
}

impl CriterionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Compliant => "compliant",
            Self::NonCompliant => "non_compliant",
            Self::NotApplicable => "not_applicable",
            Self::NeedsReview => "needs_review",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "compliant" => Some(Self::Compliant),
            "non_compliant" => Some(Self::NonCompliant),
            "not_applicable" => Some(Self::NotApplicable),
            "needs_review" => Some(Self::NeedsReview),
            _ => None,
        }
    }
}

/// Which mechanism resolved a criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestMethod {
    /// Violation detector evidence or element applicability.
    Automated,
    /// Classifier service verdict.
    Classifier,
    /// Deterministic fallback when the classifier was unavailable.
    Fallback,
}

impl TestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Automated => "automated",
            Self::Classifier => "classifier",
            Self::Fallback => "fallback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "automated" => Some(Self::Automated),
            "classifier" => Some(Self::Classifier),
            "fallback" => Some(Self::Fallback),
            _ => None,
        }
    }
}

/// Opaque site-level risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Site-level rollup of distinct non-compliant criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskRollup {
    pub non_compliant_criteria: Vec<String>,
    pub level_a_failures: u32,
    pub level_aa_failures: u32,
    pub risk_level: RiskLevel,
}

/// Progress of a single-page audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinglePageProgress {
    pub viewport: Option<ViewportKind>,
    pub criterion_index: u32,
    pub criterion_total: u32,
    /// A representative audit is in flight; staleness is not counted.
    pub long_running: bool,
}

/// Progress of a full-site audit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullSiteProgress {
    pub discovered: u32,
    pub fingerprinted: u32,
    pub templates: u32,
    pub audited: u32,
    pub skipped: u32,
    pub template_index: u32,
    pub template_name: Option<String>,
    pub viewport: Option<ViewportKind>,
    pub viewport_index: u32,
    pub criterion_index: u32,
    pub criterion_total: u32,
    pub long_running: bool,
}

/// What the job is doing right now, per job mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "kebab-case")]
pub enum CurrentStep {
    SinglePage(SinglePageProgress),
    FullSite(FullSiteProgress),
}

impl CurrentStep {
    pub fn long_running(&self) -> bool {
        match self {
            Self::SinglePage(p) => p.long_running,
            Self::FullSite(p) => p.long_running,
        }
    }
}

/// A persisted audit job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditJob {
    pub id: String,
    pub url: String,
    pub domain: String,
    pub mode: AuditMode,
    pub status: JobStatus,
    pub max_depth: u32,
    pub max_urls: u32,
    pub viewport: Option<ViewportKind>,
    pub discovery_method: Option<DiscoveryMethod>,
    pub compliance_rate: Option<f64>,
    pub total_violations: u32,
    pub risk: Option<RiskRollup>,
    pub pages_discovered: u32,
    pub templates_count: u32,
    pub templates_audited: u32,
    pub templates_skipped: u32,
    pub current_step: Option<CurrentStep>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
}

/// Parameters for creating a job.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub url: String,
    pub domain: String,
    pub mode: AuditMode,
    pub max_depth: u32,
    pub max_urls: u32,
    pub viewport: Option<ViewportKind>,
}

/// A URL discovered for a full-site job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredPage {
    pub id: i64,
    pub job_id: String,
    pub url: String,
    pub fingerprint: Option<String>,
    pub changed: bool,
    pub template_id: Option<i64>,
}

/// One cluster of structurally identical (or near-identical) pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageTemplate {
    pub id: i64,
    pub job_id: String,
    pub fingerprint: String,
    pub page_count: u32,
    pub representative_url: String,
    pub sample_paths: Vec<String>,
    pub compliance_rate: Option<f64>,
    pub needs_audit: bool,
    pub reused_from_job: Option<String>,
}

/// Parameters for creating a template row.
#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub fingerprint: String,
    pub page_count: u32,
    pub representative_url: String,
    pub sample_paths: Vec<String>,
    pub needs_audit: bool,
}

/// One rule violation reported by the violation detector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Stable rule identifier, e.g. `image-alt`.
    pub rule_id: String,
    pub description: String,
    /// `minor`, `moderate`, `serious`, or `critical`.
    pub impact: String,
    /// Outer-HTML snippets of the affected elements.
    #[serde(default)]
    pub nodes: Vec<String>,
}

/// Outcome of one accessibility criterion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriterionResult {
    pub criterion_id: String,
    pub status: CriterionStatus,
    pub confidence: u8,
    pub reasoning: String,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub method: TestMethod,
}

/// One audit execution of a page under one viewport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ViewportResult {
    pub id: i64,
    pub job_id: String,
    pub template_id: Option<i64>,
    pub viewport: ViewportKind,
    pub width: u32,
    pub height: u32,
    pub url: String,
    pub compliance_rate: f64,
    pub violation_count: u32,
    pub violations: serde_json::Value,
    pub criteria: Vec<CriterionResult>,
    pub created_at: String,
}

/// Parameters for appending a viewport result.
#[derive(Debug, Clone)]
pub struct NewViewportResult {
    pub job_id: String,
    pub template_id: Option<i64>,
    pub viewport: Viewport,
    pub url: String,
    pub compliance_rate: f64,
    pub violation_count: u32,
    pub violations: serde_json::Value,
    pub criteria: Vec<CriterionResult>,
}

/// Last-seen fingerprint of a URL, kept across jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageHashCacheEntry {
    pub domain: String,
    pub url: String,
    pub fingerprint: String,
    pub job_id: String,
    pub updated_at: String,
}

/// Final aggregate figures written when a job completes.
#[derive(Debug, Clone, Default)]
pub struct JobSummary {
    pub compliance_rate: Option<f64>,
    pub total_violations: u32,
    pub risk: Option<RiskRollup>,
    pub templates_count: u32,
    pub templates_audited: u32,
    pub templates_skipped: u32,
}

/// A template together with its viewport results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateReport {
    #[serde(flatten)]
    pub template: PageTemplate,
    pub viewports: Vec<ViewportResult>,
}

/// A job with every nested row, as returned for completed jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    #[serde(flatten)]
    pub job: AuditJob,
    pub templates: Vec<TemplateReport>,
    /// Viewport results not tied to a template (single-page mode).
    pub viewports: Vec<ViewportResult>,
    pub pages: Vec<DiscoveredPage>,
}

/// Errors that can occur in the core library.
#[derive(thiserror::Error, Debug)]
pub enum GaugeError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// Convenience result type.
pub type GaugeResult<T> = Result<T, GaugeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_moves_forward_only() {
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Discovering));
        assert!(JobStatus::Discovering.can_transition_to(JobStatus::Clustering));
        assert!(JobStatus::Pending.can_transition_to(JobStatus::Auditing));
        assert!(!JobStatus::Auditing.can_transition_to(JobStatus::Discovering));
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Auditing));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        for s in [
            JobStatus::Pending,
            JobStatus::Discovering,
            JobStatus::Clustering,
            JobStatus::Auditing,
        ] {
            assert!(s.can_transition_to(JobStatus::Failed));
        }
        assert!(!JobStatus::Completed.can_transition_to(JobStatus::Failed));
    }

    #[test]
    fn test_current_step_serialization_is_tagged() {
        let step = CurrentStep::FullSite(FullSiteProgress {
            discovered: 12,
            templates: 3,
            ..Default::default()
        });
        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["mode"], "full-site");
        assert_eq!(json["discovered"], 12);

        let parsed: CurrentStep = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, step);
    }

    #[test]
    fn test_viewport_order() {
        let kinds: Vec<_> = Viewport::required().iter().map(|v| v.kind).collect();
        assert_eq!(
            kinds,
            vec![ViewportKind::Desktop, ViewportKind::Tablet, ViewportKind::Mobile]
        );
        assert_eq!(ViewportKind::parse(" Mobile "), Some(ViewportKind::Mobile));
        assert_eq!(ViewportKind::parse("watch"), None);
    }
}
