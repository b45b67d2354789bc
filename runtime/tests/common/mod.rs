//! Shared fixtures: in-process renderer, detector, and classifier fakes,
//! plus helpers that wire them into a job service.

#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use sitegauge::{CriterionStatus, Store, ViewportKind, Violation};
use sitegauge_runtime::acquisition::http_client::HttpClient;
use sitegauge_runtime::audit::classifier::{Classifier, ClassifierRequest, ClassifierVerdict};
use sitegauge_runtime::audit::{BuiltinDetector, PageAuditor, ViolationDetector};
use sitegauge_runtime::jobs::JobService;
use sitegauge_runtime::pipeline::{Pipeline, PipelineOptions};
use sitegauge_runtime::renderer::{LoadedPage, NavigationResult, PageLoader, RenderContext, Renderer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Pages = Arc<Mutex<HashMap<String, String>>>;

/// Serves fixed HTML per URL and records the viewport of every navigation.
#[derive(Clone, Default)]
pub struct FakeRenderer {
    pages: Pages,
    navigations: Arc<Mutex<Vec<(String, Option<ViewportKind>)>>>,
    active: Arc<AtomicUsize>,
    delay: Duration,
}

impl FakeRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every navigation takes `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn set_page(&self, url: &str, html: &str) {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), html.to_string());
    }

    pub fn navigations(&self) -> Vec<(String, Option<ViewportKind>)> {
        self.navigations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Renderer for FakeRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        self.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeContext {
            pages: Arc::clone(&self.pages),
            navigations: Arc::clone(&self.navigations),
            active: Arc::clone(&self.active),
            delay: self.delay,
            viewport: None,
            html: String::new(),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

struct FakeContext {
    pages: Pages,
    navigations: Arc<Mutex<Vec<(String, Option<ViewportKind>)>>>,
    active: Arc<AtomicUsize>,
    delay: Duration,
    viewport: Option<ViewportKind>,
    html: String,
}

#[async_trait]
impl RenderContext for FakeContext {
    async fn set_viewport(&mut self, viewport: &sitegauge::Viewport) -> Result<()> {
        self.viewport = Some(viewport.kind);
        Ok(())
    }

    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<NavigationResult> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.navigations
            .lock()
            .unwrap()
            .push((url.to_string(), self.viewport));
        let page = self.pages.lock().unwrap().get(url).cloned();
        let status = match page {
            Some(html) => {
                self.html = html;
                200
            }
            None => {
                self.html = "<html><body>Not found</body></html>".to_string();
                404
            }
        };
        Ok(NavigationResult {
            final_url: url.to_string(),
            status,
            load_time_ms: 1,
        })
    }

    async fn execute_js(&self, _script: &str) -> Result<serde_json::Value> {
        Ok(serde_json::Value::Null)
    }

    async fn get_html(&self) -> Result<String> {
        Ok(self.html.clone())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Built-in rules, counting every call.
#[derive(Default)]
pub struct CountingDetector {
    inner: BuiltinDetector,
    calls: AtomicUsize,
}

impl CountingDetector {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ViolationDetector for CountingDetector {
    async fn detect(&self, page: &LoadedPage) -> Result<Vec<Violation>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.detect(page).await
    }
}

pub struct PanickingDetector;

#[async_trait]
impl ViolationDetector for PanickingDetector {
    async fn detect(&self, _page: &LoadedPage) -> Result<Vec<Violation>> {
        panic!("detector crashed")
    }
}

/// Judges every criterion compliant.
pub struct AgreeableClassifier;

#[async_trait]
impl Classifier for AgreeableClassifier {
    async fn classify(&self, _request: &ClassifierRequest) -> Result<ClassifierVerdict> {
        Ok(ClassifierVerdict {
            status: CriterionStatus::Compliant,
            confidence: 85.0,
            reasoning: "No issues found".to_string(),
            issues: Vec::new(),
            recommendations: Vec::new(),
        })
    }
}

pub fn job_service(
    store: &Store,
    renderer: Arc<dyn Renderer>,
    detector: Arc<dyn ViolationDetector>,
    classifier: Option<Arc<dyn Classifier>>,
) -> JobService {
    let loader = PageLoader::new(renderer, HttpClient::new(Duration::from_secs(5)));
    let auditor = Arc::new(PageAuditor::new(loader, detector, classifier));
    let pipeline = Pipeline::new(
        store.clone(),
        auditor,
        PipelineOptions {
            polite: false,
            ..PipelineOptions::default()
        },
    );
    JobService::new(Arc::new(pipeline))
}

/// Poll until the job is terminal or `timeout` elapses.
pub async fn wait_for_terminal(store: &Store, job_id: &str, timeout: Duration) -> sitegauge::AuditJob {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let job = store.get_job(job_id).unwrap();
        if job.status.is_terminal() || tokio::time::Instant::now() >= deadline {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub const HOME: &str = r#"<html lang="en"><head><title>Home</title></head><body>
    <main><h1>Latest</h1><ul><li><a href="/posts/1">One</a></li><li><a href="/posts/2">Two</a></li></ul></main>
</body></html>"#;

pub fn post(n: u32) -> String {
    format!(
        r#"<html lang="en"><head><title>Post {n}</title></head><body>
        <article><h1>Post {n}</h1><p>Body text {n}.</p><img src="/img/{n}.png"></article>
        </body></html>"#
    )
}

pub const ABOUT: &str = r#"<html lang="en"><head><title>About</title></head><body>
    <form action="/contact"><label for="e">Email</label><input id="e" type="email"><button>Send</button></form>
</body></html>"#;

pub const ABOUT_REDESIGNED: &str = r#"<html lang="en"><head><title>About</title></head><body>
    <form action="/contact"><fieldset><label for="e">Email</label><input id="e" type="email"><textarea></textarea><button>Send</button></fieldset></form>
</body></html>"#;

/// `<urlset>` document listing `paths` under `origin`.
pub fn urlset(origin: &str, paths: &[String]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">"#);
    for p in paths {
        xml.push_str(&format!("<url><loc>{origin}{p}</loc></url>"));
    }
    xml.push_str("</urlset>");
    xml
}
