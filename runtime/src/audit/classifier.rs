//! Criterion classifier: an external service that judges criteria the
//! violation detector could not settle.

use crate::acquisition::http_client::HttpClient;
use crate::config::CLASSIFIER_TIMEOUT;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sitegauge::compliance::Criterion;
use sitegauge::{CriterionResult, CriterionStatus, TestMethod};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Longest HTML excerpt sent per request, in characters.
pub const EXCERPT_LIMIT: usize = 12_000;

/// One classification request.
#[derive(Debug, Clone, Serialize)]
pub struct ClassifierRequest {
    pub criterion_id: String,
    pub criterion: String,
    pub description: String,
    pub url: String,
    pub html: String,
}

impl ClassifierRequest {
    pub fn new(criterion: &Criterion, url: &str, excerpt: &str) -> Self {
        Self {
            criterion_id: criterion.id.to_string(),
            criterion: criterion.title.to_string(),
            description: criterion.description.to_string(),
            url: url.to_string(),
            html: excerpt.to_string(),
        }
    }
}

/// The classifier's structured verdict.
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierVerdict {
    pub status: CriterionStatus,
    pub confidence: f64,
    #[serde(default)]
    pub reasoning: String,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl ClassifierVerdict {
    pub fn into_result(self, criterion_id: &str) -> CriterionResult {
        let confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 100.0).round() as u8
        } else {
            0
        };
        CriterionResult {
            criterion_id: criterion_id.to_string(),
            status: self.status,
            confidence,
            reasoning: self.reasoning,
            issues: self.issues,
            recommendations: self.recommendations,
            method: TestMethod::Classifier,
        }
    }
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(&self, request: &ClassifierRequest) -> Result<ClassifierVerdict>;
}

/// Classifier reached over HTTP with a JSON request/response.
pub struct HttpClassifier {
    http: HttpClient,
    endpoint: String,
    timeout: Duration,
}

impl HttpClassifier {
    pub fn new(http: HttpClient, endpoint: impl Into<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            timeout: CLASSIFIER_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Classifier for HttpClassifier {
    async fn classify(&self, request: &ClassifierRequest) -> Result<ClassifierVerdict> {
        self.http
            .post_json(&self.endpoint, request, self.timeout)
            .await
            .with_context(|| format!("classifier request for {} failed", request.criterion_id))
    }
}

/// Bounds the number of in-flight classifier calls across all audits.
pub struct GatedClassifier {
    inner: Arc<dyn Classifier>,
    permits: Arc<Semaphore>,
}

impl GatedClassifier {
    pub fn new(inner: Arc<dyn Classifier>, concurrency: usize) -> Self {
        Self {
            inner,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
        }
    }
}

#[async_trait]
impl Classifier for GatedClassifier {
    async fn classify(&self, request: &ClassifierRequest) -> Result<ClassifierVerdict> {
        let _permit = self
            .permits
            .acquire()
            .await
            .context("classifier gate closed")?;
        self.inner.classify(request).await
    }
}

fn noise_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [
            r"(?is)<script\b.*?</script\s*>",
            r"(?is)<style\b.*?</style\s*>",
            r"(?is)<noscript\b.*?</noscript\s*>",
            r"(?s)<!--.*?-->",
            r"(?is)<svg\b.*?</svg\s*>",
        ]
        .iter()
        .filter_map(|p| Regex::new(p).ok())
        .collect()
    })
}

fn whitespace() -> Option<&'static Regex> {
    static WS: OnceLock<Option<Regex>> = OnceLock::new();
    WS.get_or_init(|| Regex::new(r"\s+").ok()).as_ref()
}

/// Strip scripts, styles, comments, and inline SVG, collapse whitespace,
/// and cut to `limit` characters.
pub fn reduce_html(html: &str, limit: usize) -> String {
    let mut out = html.to_string();
    for re in noise_patterns() {
        out = re.replace_all(&out, "").into_owned();
    }
    if let Some(ws) = whitespace() {
        out = ws.replace_all(&out, " ").into_owned();
    }
    let out = out.trim();
    if out.chars().count() <= limit {
        return out.to_string();
    }
    out.chars().take(limit).collect()
}
