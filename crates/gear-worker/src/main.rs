//! Gear worker: serves the echo, page and proxy task types until Ctrl-C

mod config;
mod tasks;

use std::sync::Arc;

use anyhow::{Context, Result};
use gear::fetch::HttpFetcher;
use gear::{Manager, ProxyPool};
use serde_json::json;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use config::WorkerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded environment from {}", path.display());
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "gear=debug,gear_worker=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("gear-worker starting...");

    let config = WorkerConfig::from_env();
    tracing::info!(
        tasks = ?config.tasks,
        restore = config.restore,
        proxies = config.proxies.len(),
        "Worker configured"
    );

    let pool = Arc::new(ProxyPool::new(config.gear.proxy.clone()));
    for proxy in &config.proxies {
        pool.add(&proxy.ip, proxy.port, proxy.priority);
    }

    let manager = Manager::in_memory().with_config(config.gear.dispatch.clone());
    tasks::register(&manager, &config, pool, HttpFetcher::new())
        .context("failed to register task types")?;

    for url in &config.seed_urls {
        manager
            .submit(tasks::PAGE, json!({ "url": url }))
            .await
            .with_context(|| format!("failed to seed {}", url))?;
    }
    if let Some(url) = &config.proxy_feed_url {
        manager
            .submit(tasks::PROXY, json!({ "url": url }))
            .await
            .context("failed to seed proxy feed")?;
    }
    if let Some(remaining) = config.echo_seed {
        manager
            .submit(tasks::ECHO, json!({ "text": "tick", "remaining": remaining }))
            .await
            .context("failed to seed echo")?;
    }

    manager
        .start_all(&config.tasks, config.restore)
        .await
        .context("failed to start dispatch loops")?;

    tracing::info!(serving = ?manager.serving(), "Worker ready, waiting for shutdown signal...");
    tokio::signal::ctrl_c().await?;

    manager.shutdown().await;
    tracing::info!("Worker shutdown complete");
    Ok(())
}
