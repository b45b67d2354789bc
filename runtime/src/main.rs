// Copyright 2026 Sitegauge Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use sitegauge_runtime::cli::{self, ServiceOptions};
use sitegauge_runtime::config::RuntimeConfig;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "sitegauge",
    about = "Sitegauge: template-aware, incremental accessibility audits",
    version,
    after_help = "Run 'sitegauge <command> --help' for details on each command."
)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// SQLite database path (overrides SITEGAUGE_DB)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Classifier endpoint (overrides SITEGAUGE_CLASSIFIER_URL)
    #[arg(long, global = true)]
    classifier_url: Option<String>,

    /// Load pages over plain HTTP even when Chromium is installed
    #[arg(long, global = true)]
    no_browser: bool,

    /// Ignore robots.txt rules and crawl without delays
    #[arg(long, global = true)]
    ignore_robots: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the REST and progress-stream API
    Serve {
        /// Bind address (overrides SITEGAUGE_ADDR)
        #[arg(long)]
        addr: Option<SocketAddr>,
    },
    /// Audit a whole site in the foreground and print the report
    Audit {
        /// Base URL of the site
        url: String,
        /// Crawl depth bound (clamped to 1-5)
        #[arg(long, default_value = "2")]
        depth: u32,
        /// URL count bound (clamped to 1-500)
        #[arg(long, default_value = "100")]
        max_urls: u32,
    },
    /// Audit a single page under one viewport
    Page {
        /// Page URL
        url: String,
        /// desktop, tablet, or mobile
        #[arg(long, default_value = "desktop")]
        viewport: String,
    },
    /// Show a stored audit job
    Status {
        /// Job id returned when the audit was started
        job_id: String,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        shell: Shell,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "sitegauge", &mut std::io::stdout());
        return Ok(());
    }

    cli::init_tracing(cli.log_json);

    let mut config = RuntimeConfig::from_env();
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(url) = cli.classifier_url {
        config.classifier_url = Some(url);
    }
    let options = ServiceOptions {
        browser: !cli.no_browser,
        polite: !cli.ignore_robots,
    };

    let result = match cli.command {
        Commands::Serve { addr } => {
            let addr = addr.unwrap_or(config.addr);
            let services = cli::build_services(&config, options).await?;
            cli::serve::run(services, addr).await
        }
        Commands::Audit {
            url,
            depth,
            max_urls,
        } => {
            let services = cli::build_services(&config, options).await?;
            let r = cli::audit_cmd::run(&services, &url, depth, max_urls).await;
            services.shutdown().await;
            r
        }
        Commands::Page { url, viewport } => {
            let services = cli::build_services(&config, options).await?;
            let r = cli::page_cmd::run(&services, &url, &viewport).await;
            services.shutdown().await;
            r
        }
        Commands::Status { job_id } => cli::status::run(&config.db_path, &job_id),
        Commands::Completions { .. } => Ok(()),
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        eprintln!("  Error: {e:#}");
        std::process::exit(1);
    }
    result
}
