//! REST API over a real listener: job creation, progress events, reports.

mod common;

use common::{CountingDetector, FakeRenderer};
use serde_json::{json, Value};
use sitegauge::Store;
use sitegauge_runtime::progress::ProgressStreamer;
use sitegauge_runtime::rest::{self, AppState};
use std::sync::Arc;
use std::time::Duration;

struct Api {
    base: String,
    renderer: FakeRenderer,
    client: reqwest::Client,
}

async fn start_api() -> Api {
    let store = Store::memory().unwrap();
    let renderer = FakeRenderer::new();
    let jobs = common::job_service(
        &store,
        Arc::new(renderer.clone()),
        Arc::new(CountingDetector::default()),
        None,
    );
    let state = AppState {
        streamer: ProgressStreamer::new(store.clone())
            .with_intervals(Duration::from_millis(25), Duration::from_millis(25)),
        ..AppState::new(jobs, true)
    };

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, rest::router(Arc::new(state)))
            .await
            .unwrap();
    });

    Api {
        base: format!("http://{addr}"),
        renderer,
        client: reqwest::Client::new(),
    }
}

fn data_lines(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|l| l.strip_prefix("data:"))
        .map(|d| serde_json::from_str(d.trim()).unwrap())
        .collect()
}

#[tokio::test]
async fn test_health() {
    let api = start_api().await;
    let resp = api
        .client
        .get(format!("{}/health", api.base))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["browser"], true);
}

#[tokio::test]
async fn test_invalid_requests() {
    let api = start_api().await;

    let resp = api
        .client
        .post(format!("{}/api/v1/audits/site", api.base))
        .json(&json!({ "url": "not a url" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "E_INVALID_PARAMS");

    let resp = api
        .client
        .post(format!("{}/api/v1/audits/page", api.base))
        .json(&json!({ "url": "https://example.com/", "viewport": "watch" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);

    for suffix in ["", "/events"] {
        let resp = api
            .client
            .get(format!("{}/api/v1/audits/no-such-job{suffix}", api.base))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["error"]["code"], "E_NOT_FOUND");
    }
}

#[tokio::test]
async fn test_page_audit_lifecycle() {
    let api = start_api().await;
    let page = "https://shop.example/products/1";
    api.renderer.set_page(page, &common::post(1));

    let resp = api
        .client
        .post(format!("{}/api/v1/audits/page", api.base))
        .json(&json!({ "url": page, "viewport": "tablet" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let created: Value = resp.json().await.unwrap();
    let id = created["job_id"].as_str().unwrap().to_string();
    assert_eq!(created["mode"], "single-page");
    assert_eq!(created["viewport"], "tablet");

    // the event stream ends once the job is terminal
    let body = tokio::time::timeout(
        Duration::from_secs(10),
        api.client
            .get(format!("{}/api/v1/audits/{id}/events", api.base))
            .send()
            .await
            .unwrap()
            .text(),
    )
    .await
    .expect("event stream should close")
    .unwrap();
    let events = data_lines(&body);
    assert!(!events.is_empty());
    let last = events.last().unwrap();
    assert_eq!(last["status"], "completed");
    assert!(last["compliance_rate"].is_number());
    let seqs: Vec<u64> = events.iter().map(|e| e["seq"].as_u64().unwrap()).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]));

    let report: Value = api
        .client
        .get(format!("{}/api/v1/audits/{id}", api.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["status"], "completed");
    assert_eq!(report["viewports"].as_array().unwrap().len(), 1);
    assert_eq!(report["viewports"][0]["width"], 768);

    let listing: Value = api
        .client
        .get(format!("{}/api/v1/audits?limit=5", api.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let audits = listing["audits"].as_array().unwrap();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0]["id"], id.as_str());
}

#[tokio::test]
async fn test_failed_job_report_is_available() {
    let api = start_api().await;

    let resp = api
        .client
        .post(format!("{}/api/v1/audits/page", api.base))
        .json(&json!({ "url": "https://shop.example/missing" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let created: Value = resp.json().await.unwrap();
    let id = created["job_id"].as_str().unwrap().to_string();

    let body = api
        .client
        .get(format!("{}/api/v1/audits/{id}/events", api.base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let last = data_lines(&body).pop().unwrap();
    assert_eq!(last["status"], "failed");
    assert!(last["error"].as_str().unwrap().contains("HTTP 404"));

    let report: Value = api
        .client
        .get(format!("{}/api/v1/audits/{id}", api.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["status"], "failed");
    assert!(report["viewports"].as_array().unwrap().is_empty());
}
