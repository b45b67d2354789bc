//! `sitegauge serve`: run the REST + SSE API.

use crate::cli::Services;
use crate::rest::{self, AppState};
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

pub async fn run(services: Services, addr: SocketAddr) -> Result<()> {
    info!(
        "starting Sitegauge v{} ({} mode)",
        env!("CARGO_PKG_VERSION"),
        if services.browser_available() {
            "browser"
        } else {
            "HTTP-only"
        }
    );
    let state = Arc::new(AppState::new(
        services.jobs.clone(),
        services.browser_available(),
    ));

    let result = tokio::select! {
        r = rest::start(addr, state) => r,
        _ = tokio::signal::ctrl_c() => {
            info!("shutting down");
            Ok(())
        }
    };
    services.shutdown().await;
    result
}
