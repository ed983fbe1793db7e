use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use forum_reply_watcher::config::Config;
use forum_reply_watcher::crawl::{FetchPage, HttpFetcher, Scheduler};
use forum_reply_watcher::notify::{Notifier, SmtpNotifier};
use forum_reply_watcher::store::DayStore;
use forum_reply_watcher::web;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    init_tracing()?;

    info!("Starting forum-reply-watcher");

    let config = Config::from_env().context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    info!(site_url = %config.site_url, crawl_user = %config.crawl_user, "Configuration loaded");

    let store = DayStore::new(config.user_dir());
    store.ensure_dir().await.with_context(|| {
        format!("Failed to create data directory: {}", store.dir().display())
    })?;

    let fetcher: Arc<dyn FetchPage> = Arc::new(
        HttpFetcher::new(config.http_timeout, config.retry_policy())
            .context("Failed to build HTTP client")?,
    );

    let notifier: Option<Arc<dyn Notifier>> = match &config.smtp {
        Some(smtp) => {
            let notifier = SmtpNotifier::new(smtp).context("Invalid mail configuration")?;
            info!(host = %smtp.host, to = %smtp.to, "Mail notifications enabled");
            Some(Arc::new(notifier))
        }
        None => {
            info!("Mail notifications disabled");
            None
        }
    };

    let scheduler = Scheduler::new(&config, fetcher, store, notifier)
        .await
        .context("Failed to initialize scheduler")?;

    // Start crawl loop in background
    let crawl_scheduler = scheduler.clone();
    let crawl_handle = tokio::spawn(async move {
        crawl_scheduler.run_loop().await;
    });
    info!("Crawl loop started");

    // Start web server in background
    let web_handle = tokio::spawn(async move {
        if let Err(e) = web::serve(&config, scheduler).await {
            error!("Web server error: {e:#}");
        }
    });

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down...");

    web_handle.abort();
    crawl_handle.abort();

    info!("Shutdown complete");

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,forum_reply_watcher=debug"));

    // Check if JSON logging is requested
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| matches!(v.to_lowercase().as_str(), "json" | "structured"))
        .unwrap_or(false);

    if use_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .map_err(|e| anyhow::anyhow!("Failed to initialize tracing: {e}"))?;
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
