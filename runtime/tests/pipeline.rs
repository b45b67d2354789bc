//! End-to-end pipeline runs against a fake renderer: template clustering,
//! incremental re-audits, single-page audits, and failure handling.

mod common;

use anyhow::Result;
use async_trait::async_trait;
use common::{CountingDetector, FakeRenderer, PanickingDetector};
use futures::StreamExt;
use sitegauge::{CurrentStep, DiscoveryMethod, JobStatus, Store, ViewportKind, Violation};
use sitegauge_runtime::audit::ViolationDetector;
use sitegauge_runtime::progress::ProgressStreamer;
use sitegauge_runtime::renderer::LoadedPage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Site {
    server: MockServer,
    renderer: FakeRenderer,
}

impl Site {
    fn url(&self, p: &str) -> String {
        format!("{}{p}", self.server.uri())
    }
}

/// Home, three posts sharing a layout, and an about page.
async fn blog() -> Site {
    let server = MockServer::start().await;
    let origin = server.uri();
    let paths: Vec<String> = ["/", "/posts/1", "/posts/2", "/posts/3", "/about"]
        .iter()
        .map(|p| p.to_string())
        .collect();
    Mock::given(method("GET"))
        .and(path("/sitemap.xml"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(common::urlset(&origin, &paths), "application/xml"),
        )
        .mount(&server)
        .await;

    let renderer = FakeRenderer::new();
    renderer.set_page(&format!("{origin}/"), common::HOME);
    for n in 1..=3 {
        renderer.set_page(&format!("{origin}/posts/{n}"), &common::post(n));
    }
    renderer.set_page(&format!("{origin}/about"), common::ABOUT);
    Site { server, renderer }
}

/// A site without sitemaps: a home page linking `posts` posts and an
/// about page, each answered by `renderer`.
async fn crawl_only(renderer: FakeRenderer, posts: u32) -> Site {
    let server = MockServer::start().await;
    let origin = server.uri();
    let links: String = (1..=posts)
        .map(|n| format!(r#"<li><a href="/posts/{n}">Post {n}</a></li>"#))
        .collect();
    let home = format!(
        r#"<html lang="en"><head><title>Home</title></head><body>
        <main><h1>Latest</h1><ul>{links}</ul><a href="/about">About</a></main>
        </body></html>"#
    );
    renderer.set_page(&format!("{origin}/"), &home);
    for n in 1..=posts {
        renderer.set_page(&format!("{origin}/posts/{n}"), &common::post(n));
    }
    renderer.set_page(&format!("{origin}/about"), common::ABOUT);
    Site { server, renderer }
}

/// Fails its own job on the first detection, the way the progress
/// streamer does when a job stalls.
struct JobFailingDetector {
    store: Store,
    job_id: Mutex<Option<String>>,
    inner: CountingDetector,
}

#[async_trait]
impl ViolationDetector for JobFailingDetector {
    async fn detect(&self, page: &LoadedPage) -> Result<Vec<Violation>> {
        if self.inner.calls() == 0 {
            let id = self.job_id.lock().unwrap().clone().unwrap();
            self.store.fail_job(&id, "No progress observed for 12 consecutive polls")?;
        }
        self.inner.detect(page).await
    }
}

#[tokio::test]
async fn test_full_site_audit_then_incremental_rerun() {
    let site = blog().await;
    let store = Store::memory().unwrap();
    let detector = Arc::new(CountingDetector::default());
    let jobs = common::job_service(&store, Arc::new(site.renderer.clone()), detector.clone(), None);

    // first run audits every template under all three viewports
    let first = jobs.create_site_audit(&site.url("/"), 2, 100).unwrap();
    let first = jobs.run_to_completion(&first.id).await.unwrap();
    assert_eq!(first.status, JobStatus::Completed, "{:?}", first.error);
    assert_eq!(first.discovery_method, Some(DiscoveryMethod::Sitemap));
    assert_eq!(first.pages_discovered, 5);
    assert_eq!(first.templates_count, 3);
    assert_eq!(first.templates_audited, 3);
    assert_eq!(first.templates_skipped, 0);
    assert_eq!(detector.calls(), 9);
    assert!(first.compliance_rate.is_some());
    assert!(first.completed_at.is_some());

    let report = store.job_report(&first.id).unwrap();
    let posts = report
        .templates
        .iter()
        .find(|t| t.template.page_count == 3)
        .expect("post template");
    assert_eq!(posts.viewports.len(), 3);
    assert!(report.pages.iter().all(|p| p.template_id.is_some() && p.changed));

    // the post image has no alt text
    let risk = first.risk.clone().unwrap();
    assert!(risk.non_compliant_criteria.contains(&"1.1.1".to_string()));

    // unchanged site: nothing is re-audited and results carry forward
    let second = jobs.create_site_audit(&site.url("/"), 2, 100).unwrap();
    let second = jobs.run_to_completion(&second.id).await.unwrap();
    assert_eq!(second.status, JobStatus::Completed, "{:?}", second.error);
    assert_eq!(detector.calls(), 9);
    assert_eq!(second.templates_audited, 0);
    assert_eq!(second.templates_skipped, 3);
    assert_eq!(second.total_violations, first.total_violations);
    assert_eq!(second.risk, first.risk);
    let (a, b) = (first.compliance_rate.unwrap(), second.compliance_rate.unwrap());
    assert!((a - b).abs() < 1e-9, "{a} != {b}");

    let reused = store.list_templates(&second.id).unwrap();
    assert!(reused
        .iter()
        .all(|t| t.reused_from_job.as_deref() == Some(first.id.as_str())));
    assert!(store.list_pages(&second.id).unwrap().iter().all(|p| !p.changed));

    // one page changes structure: only its template is audited
    site.renderer.set_page(&site.url("/about"), common::ABOUT_REDESIGNED);
    let third = jobs.create_site_audit(&site.url("/"), 2, 100).unwrap();
    let third = jobs.run_to_completion(&third.id).await.unwrap();
    assert_eq!(third.status, JobStatus::Completed, "{:?}", third.error);
    assert_eq!(third.templates_audited, 1);
    assert_eq!(third.templates_skipped, 2);
    assert_eq!(detector.calls(), 12);

    let changed: Vec<String> = store
        .list_pages(&third.id)
        .unwrap()
        .into_iter()
        .filter(|p| p.changed)
        .map(|p| p.url)
        .collect();
    assert_eq!(changed, vec![site.url("/about")]);
}

#[tokio::test]
async fn test_unreachable_pages_form_unresolved_template() {
    let site = blog().await;
    // the sitemap lists five pages but only two of them render
    let renderer = FakeRenderer::new();
    renderer.set_page(&site.url("/"), common::HOME);
    renderer.set_page(&site.url("/about"), common::ABOUT);

    let store = Store::memory().unwrap();
    let detector = Arc::new(CountingDetector::default());
    let jobs = common::job_service(&store, Arc::new(renderer), detector.clone(), None);

    let job = jobs.create_site_audit(&site.url("/"), 2, 100).unwrap();
    let job = jobs.run_to_completion(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_eq!(job.templates_count, 3);
    assert_eq!(job.templates_audited, 2);
    assert_eq!(detector.calls(), 6);

    let templates = store.list_templates(&job.id).unwrap();
    let unresolved = templates
        .iter()
        .find(|t| t.fingerprint == sitegauge::cluster::UNRESOLVED_FINGERPRINT)
        .expect("unresolved template");
    assert_eq!(unresolved.page_count, 3);
    assert!(unresolved.compliance_rate.is_none());
}

#[tokio::test]
async fn test_single_page_audit_uses_requested_viewport() {
    let site = blog().await;
    let store = Store::memory().unwrap();
    let detector = Arc::new(CountingDetector::default());
    let jobs = common::job_service(
        &store,
        Arc::new(site.renderer.clone()),
        detector.clone(),
        Some(Arc::new(common::AgreeableClassifier)),
    );

    let url = site.url("/posts/2");
    let job = jobs.create_page_audit(&url, Some("mobile")).unwrap();
    let job = jobs.run_to_completion(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_eq!(detector.calls(), 1);
    assert_eq!(
        site.renderer.navigations(),
        vec![(url.clone(), Some(ViewportKind::Mobile))]
    );

    let report = store.job_report(&job.id).unwrap();
    assert!(report.templates.is_empty());
    assert_eq!(report.viewports.len(), 1);
    assert_eq!(report.viewports[0].viewport, ViewportKind::Mobile);
    assert_eq!(report.viewports[0].width, 375);
    assert!(job.total_violations >= 1);
    assert_eq!(job.compliance_rate, Some(report.viewports[0].compliance_rate));
}

#[tokio::test]
async fn test_single_page_error_status_fails_job() {
    let site = blog().await;
    let store = Store::memory().unwrap();
    let jobs = common::job_service(
        &store,
        Arc::new(site.renderer.clone()),
        Arc::new(CountingDetector::default()),
        None,
    );

    let job = jobs.create_page_audit(&site.url("/missing"), None).unwrap();
    let job = jobs.run_to_completion(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("HTTP 404"));
}

#[tokio::test]
async fn test_panicking_pipeline_marks_job_failed() {
    let site = blog().await;
    let store = Store::memory().unwrap();
    let jobs = common::job_service(
        &store,
        Arc::new(site.renderer.clone()),
        Arc::new(PanickingDetector),
        None,
    );

    let job = jobs.start_page_audit(&site.url("/about"), None).unwrap();
    let job = common::wait_for_terminal(&store, &job.id, Duration::from_secs(5)).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.error.as_deref(), Some("pipeline task panicked"));
}

#[tokio::test]
async fn test_empty_site_fails_job() {
    let server = MockServer::start().await;
    let store = Store::memory().unwrap();
    let jobs = common::job_service(
        &store,
        Arc::new(FakeRenderer::new()),
        Arc::new(CountingDetector::default()),
        None,
    );

    let job = jobs
        .create_site_audit(&format!("{}/", server.uri()), 2, 100)
        .unwrap();
    let job = jobs.run_to_completion(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error.unwrap().contains("no pages discovered"));
}

#[tokio::test]
async fn test_crawled_pages_are_rendered_once_before_audit() {
    let site = crawl_only(FakeRenderer::new(), 3).await;
    let store = Store::memory().unwrap();
    let jobs = common::job_service(
        &store,
        Arc::new(site.renderer.clone()),
        Arc::new(CountingDetector::default()),
        None,
    );

    let job = jobs.create_site_audit(&site.url("/"), 2, 100).unwrap();
    let job = jobs.run_to_completion(&job.id).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_eq!(job.discovery_method, Some(DiscoveryMethod::Crawl));
    assert_eq!(job.pages_discovered, 5);
    assert_eq!(job.templates_count, 3);

    let representatives: Vec<String> = store
        .list_templates(&job.id)
        .unwrap()
        .into_iter()
        .map(|t| t.representative_url)
        .collect();
    let mut per_url: HashMap<String, Vec<Option<ViewportKind>>> = HashMap::new();
    for (url, viewport) in site.renderer.navigations() {
        per_url.entry(url).or_default().push(viewport);
    }
    assert_eq!(per_url.len(), 5);
    for (url, viewports) in &per_url {
        // the crawl render doubles as the fingerprint render
        assert_eq!(viewports[0], Some(ViewportKind::Desktop), "{url}");
        let expected = if representatives.contains(url) { 4 } else { 1 };
        assert_eq!(viewports.len(), expected, "{url}: {viewports:?}");
    }
}

#[tokio::test]
async fn test_slow_crawl_reports_discovery_progress() {
    let renderer = FakeRenderer::new().with_delay(Duration::from_millis(20));
    let site = crawl_only(renderer, 12).await;
    let store = Store::memory().unwrap();
    let jobs = common::job_service(
        &store,
        Arc::new(site.renderer.clone()),
        Arc::new(CountingDetector::default()),
        None,
    );
    // the crawl alone spans more than the staleness window
    let streamer = ProgressStreamer::new(store.clone())
        .with_intervals(Duration::from_millis(10), Duration::from_millis(10))
        .with_stale_limit(15);

    let job = jobs.start_site_audit(&site.url("/"), 2, 100).unwrap();
    let events: Vec<_> = tokio::time::timeout(
        Duration::from_secs(20),
        streamer.stream(&job.id).collect::<Vec<_>>(),
    )
    .await
    .unwrap();

    let last = events.last().unwrap();
    assert_eq!(last.status, JobStatus::Completed, "{:?}", last.error);
    assert_eq!(store.get_job(&job.id).unwrap().pages_discovered, 14);

    let discovered: Vec<u32> = events
        .iter()
        .filter(|e| e.status == JobStatus::Discovering)
        .filter_map(|e| match &e.step {
            Some(CurrentStep::FullSite(p)) => Some(p.discovered),
            _ => None,
        })
        .collect();
    assert!(discovered.len() > 2, "{discovered:?}");
    assert!(discovered.windows(2).all(|w| w[0] < w[1]), "{discovered:?}");
}

#[tokio::test]
async fn test_pipeline_stops_after_job_is_failed_externally() {
    let site = blog().await;
    let store = Store::memory().unwrap();
    let detector = Arc::new(JobFailingDetector {
        store: store.clone(),
        job_id: Mutex::new(None),
        inner: CountingDetector::default(),
    });
    let jobs = common::job_service(&store, Arc::new(site.renderer.clone()), detector.clone(), None);

    let job = jobs.create_site_audit(&site.url("/"), 2, 100).unwrap();
    *detector.job_id.lock().unwrap() = Some(job.id.clone());
    let job = jobs.run_to_completion(&job.id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error.as_deref(),
        Some("No progress observed for 12 consecutive polls")
    );
    // the template in flight finishes its viewports, the rest never start
    assert_eq!(detector.inner.calls(), 3);
    assert_eq!(job.templates_audited, 0);
}
