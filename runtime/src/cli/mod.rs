//! CLI subcommand implementations for the Sitegauge binary.

pub mod audit_cmd;
pub mod page_cmd;
pub mod serve;
pub mod status;

use crate::acquisition::http_client::HttpClient;
use crate::audit::{BuiltinDetector, Classifier, GatedClassifier, HttpClassifier, PageAuditor, ViolationDetector};
use crate::config::{RuntimeConfig, NAVIGATION_TIMEOUT};
use crate::jobs::JobService;
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::progress::ProgressStreamer;
use crate::renderer::chromium::ChromiumRenderer;
use crate::renderer::{NoopRenderer, PageLoader, Renderer};
use anyhow::{Context, Result};
use futures::StreamExt;
use sitegauge::{ClusterOptions, Store};
use std::sync::Arc;
use tracing::{info, warn};

/// Initialise the global subscriber. `RUST_LOG` overrides the default
/// `sitegauge=info` directive.
pub fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sitegauge=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Options that shape how services are assembled.
#[derive(Debug, Clone, Copy)]
pub struct ServiceOptions {
    /// Try to launch Chromium; otherwise load pages over HTTP.
    pub browser: bool,
    /// Honour robots.txt and space crawl navigations.
    pub polite: bool,
}

/// Everything a command needs to run audits.
pub struct Services {
    pub jobs: JobService,
    pub renderer: Arc<dyn Renderer>,
}

impl Services {
    pub fn browser_available(&self) -> bool {
        self.renderer.is_available()
    }

    pub async fn shutdown(&self) {
        if let Err(e) = self.renderer.shutdown().await {
            warn!("renderer shutdown failed: {e:#}");
        }
    }
}

/// Open the store, launch the renderer, and wire the audit stack.
pub async fn build_services(config: &RuntimeConfig, options: ServiceOptions) -> Result<Services> {
    let store = Store::open(&config.db_path)
        .with_context(|| format!("cannot open database {}", config.db_path.display()))?;
    info!("using database {}", config.db_path.display());

    let renderer: Arc<dyn Renderer> = if options.browser {
        match ChromiumRenderer::launch(config.chromium_path.as_deref()).await {
            Ok(r) => Arc::new(r),
            Err(e) => {
                warn!("Chromium unavailable, using HTTP-only mode: {e:#}");
                Arc::new(NoopRenderer)
            }
        }
    } else {
        Arc::new(NoopRenderer)
    };

    let http = HttpClient::new(NAVIGATION_TIMEOUT);
    let loader = PageLoader::new(Arc::clone(&renderer), http.clone());

    let detector: Arc<dyn ViolationDetector> = match &config.detector_script {
        Some(path) => Arc::new(BuiltinDetector::from_script_path(path)?),
        None => Arc::new(BuiltinDetector::new()),
    };

    let classifier: Option<Arc<dyn Classifier>> = match &config.classifier_url {
        Some(url) => {
            info!(
                "classifier at {url} (concurrency {})",
                config.classifier_concurrency
            );
            let inner: Arc<dyn Classifier> = Arc::new(HttpClassifier::new(http, url.as_str()));
            Some(Arc::new(GatedClassifier::new(inner, config.classifier_concurrency)))
        }
        None => {
            info!("no classifier configured; unresolved criteria will need review");
            None
        }
    };

    let auditor = Arc::new(PageAuditor::new(loader, detector, classifier));
    let pipeline = Pipeline::new(
        store,
        auditor,
        PipelineOptions {
            cluster: ClusterOptions {
                merge_ceiling: config.cluster_ceiling,
                ..ClusterOptions::default()
            },
            render_concurrency: config.render_concurrency,
            polite: options.polite,
        },
    );

    Ok(Services {
        jobs: JobService::new(Arc::new(pipeline)),
        renderer,
    })
}

/// Echo progress events for `job_id` to stderr until the job is terminal.
pub fn follow_progress(store: &Store, job_id: &str) -> tokio::task::JoinHandle<()> {
    let mut events = Box::pin(ProgressStreamer::new(store.clone()).stream(job_id));
    tokio::spawn(async move {
        while let Some(event) = events.next().await {
            match serde_json::to_string(&event) {
                Ok(line) => eprintln!("{line}"),
                Err(e) => warn!("cannot encode progress event: {e}"),
            }
        }
    })
}

pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value).context("cannot encode output")?;
    println!("{out}");
    Ok(())
}
