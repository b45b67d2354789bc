//! Renderer abstraction for browser-based page rendering.
//!
//! Defines the `Renderer` and `RenderContext` traits that abstract over
//! the browser engine (currently Chromium via chromiumoxide), and a
//! `PageLoader` that falls back to a plain HTTP GET when no browser is
//! available.

pub mod chromium;

use crate::acquisition::http_client::HttpClient;
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sitegauge::Viewport;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// HTTP status code of the main document.
    pub status: u16,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// A browser engine that can create rendering contexts.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Create a new browser context (tab).
    async fn new_context(&self) -> Result<Box<dyn RenderContext>>;
    /// Shut down the browser engine.
    async fn shutdown(&self) -> Result<()>;
    /// Number of currently active contexts.
    fn active_contexts(&self) -> usize;
    /// Whether this renderer can render at all.
    fn is_available(&self) -> bool {
        true
    }
}

/// A single browser context (tab) for rendering pages.
#[async_trait]
pub trait RenderContext: Send + Sync {
    /// Emulate a screen size before navigating.
    async fn set_viewport(&mut self, viewport: &Viewport) -> Result<()>;
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavigationResult>;
    /// Execute JavaScript in the page context and return the result.
    async fn execute_js(&self, script: &str) -> Result<serde_json::Value>;
    /// Get the full page HTML.
    async fn get_html(&self) -> Result<String>;
    /// Close this context.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// A no-op renderer used when Chromium is unavailable.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn new_context(&self) -> Result<Box<dyn RenderContext>> {
        Err(anyhow::anyhow!("Browser not available, HTTP-only mode"))
    }
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
    fn active_contexts(&self) -> usize {
        0
    }
    fn is_available(&self) -> bool {
        false
    }
}

/// A loaded page, still open in its browser context when one was used.
pub struct LoadedPage {
    pub url: String,
    pub final_url: String,
    pub status: u16,
    pub html: String,
    pub load_time_ms: u64,
    pub context: Option<Box<dyn RenderContext>>,
}

impl LoadedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Release the browser context, if any.
    pub async fn close(mut self) {
        if let Some(ctx) = self.context.take() {
            discard(ctx).await;
        }
    }
}

/// Loads pages through the renderer, or over HTTP when it is unavailable.
#[derive(Clone)]
pub struct PageLoader {
    renderer: Arc<dyn Renderer>,
    http: HttpClient,
}

impl PageLoader {
    pub fn new(renderer: Arc<dyn Renderer>, http: HttpClient) -> Self {
        Self { renderer, http }
    }

    pub fn renderer(&self) -> &Arc<dyn Renderer> {
        &self.renderer
    }

    pub fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Load `url`, emulating `viewport` when rendering in a browser.
    pub async fn load(
        &self,
        url: &str,
        viewport: Option<&Viewport>,
        timeout: Duration,
    ) -> Result<LoadedPage> {
        if !self.renderer.is_available() {
            return self.load_http(url, timeout).await;
        }

        let mut ctx = self
            .renderer
            .new_context()
            .await
            .context("failed to create browser context")?;

        if let Some(vp) = viewport {
            if let Err(e) = ctx.set_viewport(vp).await {
                discard(ctx).await;
                return Err(e.context(format!("failed to set {} viewport", vp.kind.as_str())));
            }
        }

        let nav = match ctx.navigate(url, timeout).await {
            Ok(nav) => nav,
            Err(e) => {
                discard(ctx).await;
                return Err(e.context(format!("navigation to {url} failed")));
            }
        };

        let html = match ctx.get_html().await {
            Ok(html) => html,
            Err(e) => {
                discard(ctx).await;
                return Err(e);
            }
        };

        Ok(LoadedPage {
            url: url.to_string(),
            final_url: nav.final_url,
            status: nav.status,
            html,
            load_time_ms: nav.load_time_ms,
            context: Some(ctx),
        })
    }

    async fn load_http(&self, url: &str, timeout: Duration) -> Result<LoadedPage> {
        let start = Instant::now();
        let resp = self.http.get(url, timeout).await?;
        if let Some(ct) = resp.header("content-type") {
            if !ct.to_ascii_lowercase().contains("html") {
                bail!("{url} is not an HTML document ({ct})");
            }
        }
        Ok(LoadedPage {
            url: url.to_string(),
            final_url: resp.final_url,
            status: resp.status,
            html: resp.body,
            load_time_ms: start.elapsed().as_millis() as u64,
            context: None,
        })
    }
}

/// Close a context whose page is no longer needed. A failed close is
/// logged; the caller's own result stands.
async fn discard(ctx: Box<dyn RenderContext>) {
    if let Err(e) = ctx.close().await {
        debug!("closing browser context: {e:#}");
    }
}
