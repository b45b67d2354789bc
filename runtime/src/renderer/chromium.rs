//! Headless Chromium renderer built on chromiumoxide.

use super::{NavigationResult, RenderContext, Renderer};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::emulation::SetDeviceMetricsOverrideParams;
use chromiumoxide::page::Page;
use futures::StreamExt;
use sitegauge::Viewport;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Status of the main document, read from the Navigation Timing API.
/// Zero when the browser does not expose it.
const NAVIGATION_STATUS_JS: &str = "(() => { \
    const e = performance.getEntriesByType('navigation')[0]; \
    return e && e.responseStatus ? e.responseStatus : 0; })()";

const LAUNCH_ARGS: &[&str] = &[
    "--headless=new",
    "--disable-gpu",
    "--no-sandbox",
    "--disable-dev-shm-usage",
    "--disable-extensions",
    "--disable-background-networking",
    "--hide-scrollbars",
    "--mute-audio",
];

const PATH_BINARIES: &[&str] = &["google-chrome", "google-chrome-stable", "chromium", "chromium-browser"];

/// Install locations checked before `$PATH`, most specific first.
fn install_candidates(home: Option<&Path>) -> Vec<PathBuf> {
    let mut out = Vec::new();
    if let Some(home) = home {
        let base = home.join(".sitegauge").join("chromium");
        if cfg!(target_os = "macos") {
            for arch in ["chrome-mac-arm64", "chrome-mac-x64"] {
                out.push(base.join(arch).join(
                    "Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing",
                ));
            }
        } else {
            out.push(base.join("chrome-linux64").join("chrome"));
        }
        out.push(base.join("chrome"));
    }
    if cfg!(target_os = "macos") {
        out.push(PathBuf::from(
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
        ));
    }
    out
}

/// Resolve the browser binary: an explicit path wins, then known install
/// locations, then `$PATH`.
pub fn locate_chromium(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    install_candidates(dirs::home_dir().as_deref())
        .into_iter()
        .find(|p| p.exists())
        .or_else(|| PATH_BINARIES.iter().find_map(|name| which::which(name).ok()))
}

pub struct ChromiumRenderer {
    browser: Mutex<Browser>,
    handler: JoinHandle<()>,
    active: Arc<AtomicUsize>,
}

impl ChromiumRenderer {
    /// Launch headless Chromium from `executable`, or from the first
    /// binary [`locate_chromium`] finds.
    pub async fn launch(executable: Option<&Path>) -> Result<Self> {
        let path = locate_chromium(executable).with_context(|| match executable {
            Some(p) => format!("Chromium not found at {}", p.display()),
            None => "Chromium not found; set SITEGAUGE_CHROMIUM_PATH or install Chrome".to_string(),
        })?;

        let mut builder = BrowserConfig::builder().chrome_executable(&path);
        for arg in LAUNCH_ARGS {
            builder = builder.arg(*arg);
        }
        let config = builder
            .build()
            .map_err(|e| anyhow!("invalid browser config: {e}"))?;

        let (browser, mut events) = Browser::launch(config)
            .await
            .with_context(|| format!("failed to launch {}", path.display()))?;
        let handler = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let Err(e) = event {
                    debug!("browser handler: {e}");
                }
            }
        });
        info!("launched Chromium from {}", path.display());

        Ok(Self {
            browser: Mutex::new(browser),
            handler,
            active: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        let page = self
            .browser
            .lock()
            .await
            .new_page("about:blank")
            .await
            .context("failed to open a browser tab")?;
        self.active.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(ChromiumContext {
            page,
            active: Arc::clone(&self.active),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        let mut browser = self.browser.lock().await;
        browser.close().await.context("failed to close Chromium")?;
        if let Err(e) = browser.wait().await {
            debug!("waiting for Chromium to exit: {e}");
        }
        self.handler.abort();
        Ok(())
    }

    fn active_contexts(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }
}

/// One browser tab.
pub struct ChromiumContext {
    page: Page,
    active: Arc<AtomicUsize>,
}

impl ChromiumContext {
    async fn main_document_status(&self) -> u16 {
        self.execute_js(NAVIGATION_STATUS_JS)
            .await
            .ok()
            .and_then(|v| v.as_u64())
            .and_then(|s| u16::try_from(s).ok())
            .filter(|s| *s > 0)
            .unwrap_or(200)
    }
}

#[async_trait]
impl RenderContext for ChromiumContext {
    async fn set_viewport(&mut self, viewport: &Viewport) -> Result<()> {
        let metrics = SetDeviceMetricsOverrideParams::new(
            i64::from(viewport.width),
            i64::from(viewport.height),
            1.0,
            viewport.is_mobile(),
        );
        self.page
            .execute(metrics)
            .await
            .with_context(|| format!("cannot emulate {}x{}", viewport.width, viewport.height))?;
        Ok(())
    }

    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavigationResult> {
        let start = Instant::now();
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| anyhow!("navigation timed out after {}ms", timeout.as_millis()))?
            .with_context(|| format!("navigation to {url} failed"))?;

        let remaining = timeout.saturating_sub(start.elapsed());
        match tokio::time::timeout(remaining, self.page.wait_for_navigation()).await {
            Ok(Err(e)) => debug!("waiting for {url} to settle: {e}"),
            Err(_) => debug!("{url} still loading after {}ms", timeout.as_millis()),
            Ok(Ok(_)) => {}
        }

        let final_url = self
            .page
            .url()
            .await
            .ok()
            .flatten()
            .unwrap_or_else(|| url.to_string());

        Ok(NavigationResult {
            final_url,
            status: self.main_document_status().await,
            load_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn execute_js(&self, script: &str) -> Result<serde_json::Value> {
        self.page
            .evaluate(script)
            .await
            .context("script evaluation failed")?
            .into_value()
            .map_err(|e| anyhow!("script returned a non-JSON value: {e:?}"))
    }

    async fn get_html(&self) -> Result<String> {
        self.page.content().await.context("failed to read page HTML")
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.active.fetch_sub(1, Ordering::Relaxed);
        self.page.close().await.context("failed to close tab")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitegauge::ViewportKind;

    #[test]
    fn test_explicit_path_must_exist() {
        assert_eq!(locate_chromium(Some(Path::new("/nonexistent/chrome"))), None);
        let dir = tempfile::tempdir().unwrap();
        let fake = dir.path().join("chrome");
        std::fs::write(&fake, b"").unwrap();
        assert_eq!(locate_chromium(Some(&fake)), Some(fake));
    }

    #[test]
    fn test_install_candidates_under_home() {
        let home = Path::new("/home/auditor");
        let candidates = install_candidates(Some(home));
        assert!(candidates
            .iter()
            .all(|p| !p.starts_with(home) || p.starts_with(home.join(".sitegauge/chromium"))));
        assert!(candidates.contains(&home.join(".sitegauge/chromium/chrome")));
    }

    #[tokio::test]
    #[ignore] // needs a local Chromium
    async fn test_chromium_viewport_and_html() {
        let renderer = ChromiumRenderer::launch(None).await.unwrap();
        let mut ctx = renderer.new_context().await.unwrap();

        ctx.set_viewport(&ViewportKind::Mobile.viewport()).await.unwrap();
        ctx.navigate("data:text/html,<h1>Hello</h1><p>World</p>", Duration::from_secs(10))
            .await
            .unwrap();

        let width = ctx.execute_js("window.innerWidth").await.unwrap();
        assert_eq!(width.as_u64(), Some(375));
        assert!(ctx.get_html().await.unwrap().contains("<h1>Hello</h1>"));

        ctx.close().await.unwrap();
        assert_eq!(renderer.active_contexts(), 0);
        renderer.shutdown().await.unwrap();
    }
}
