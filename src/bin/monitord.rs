use std::sync::Arc;

use clap::Parser;
use risk_monitoring::alerts::AlertEngine;
use risk_monitoring::catalog::{FrequencyClass, ThresholdCatalog};
use risk_monitoring::dispatcher::Dispatcher;
use risk_monitoring::notifier::{Notifier, WebhookTransport};
use risk_monitoring::registry::AssetRegistry;
use risk_monitoring::scheduler::{DriverHandle, NotifierHandle};
use risk_monitoring::settings::Settings;
use risk_monitoring::source::http::HttpDataSource;
use risk_monitoring::storage::sqlite::SqliteBackend;
use risk_monitoring::storage::StorageBackend;
use serde::Deserialize;
use tracing::{error, info, level_filters::LevelFilter, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// JSON file with assets to register on startup
    #[arg(short, long)]
    assets: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssetSeed {
    symbol: String,
    name: String,
    #[serde(default = "default_enabled")]
    enabled: bool,
    config: risk_monitoring::asset::AssetConfig,
}

fn default_enabled() -> bool {
    true
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("risk_monitoring", LevelFilter::DEBUG),
        ("monitord", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    let settings = Settings::from_env();

    let backend: Arc<dyn StorageBackend> =
        Arc::new(SqliteBackend::new(&settings.database_path).await?);
    info!("storage ready at {}", settings.database_path);

    let catalog = Arc::new(ThresholdCatalog::load(backend.as_ref()).await?);

    let registry = Arc::new(AssetRegistry::new(backend.clone()));
    if let Some(path) = &args.assets {
        seed_assets(&registry, path).await?;
    }

    let gateway_url = settings
        .gateway_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("RM_GATEWAY_URL must be set"))?;
    let source = Arc::new(
        HttpDataSource::new(gateway_url, settings.gateway_token.clone())
            .map_err(|e| anyhow::anyhow!("gateway client: {e}"))?,
    );

    let alerts = Arc::new(AlertEngine::new(
        backend.clone(),
        catalog.clone(),
        settings.suppression_window,
    ));

    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        backend.clone(),
        source,
        alerts,
        settings.clone(),
    ));

    let mut drivers = Vec::new();
    for class in FrequencyClass::ALL {
        let handle = DriverHandle::spawn(class, dispatcher.clone(), settings.tick_interval(class));
        info!("tick driver started for {class} class");
        drivers.push(handle);
    }

    let notifier_handle = match &settings.webhook_url {
        Some(url) => {
            let transport = WebhookTransport::new(url.clone())
                .map_err(|e| anyhow::anyhow!("webhook transport: {e}"))?;
            let notifier = Arc::new(Notifier::new(
                backend.clone(),
                Arc::new(transport),
                settings.notify_retry_cap,
            ));
            let handle = NotifierHandle::spawn(notifier, settings.interval_critical);
            info!("notifier driver started");
            Some(handle)
        }
        None => {
            warn!("RM_WEBHOOK_URL not set, alerts will accumulate unnotified");
            None
        }
    };

    info!("all drivers started, monitoring active");
    info!("press Ctrl+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal, stopping drivers..."),
        Err(err) => error!("unable to listen for shutdown signal: {err}"),
    }

    for handle in drivers {
        handle.shutdown().await;
    }
    if let Some(handle) = notifier_handle {
        handle.shutdown().await;
    }

    backend.close().await?;
    info!("all drivers stopped, exiting");

    Ok(())
}

async fn seed_assets(registry: &AssetRegistry, path: &str) -> anyhow::Result<()> {
    let contents = std::fs::read_to_string(path)?;
    let seeds: Vec<AssetSeed> = serde_json::from_str(&contents)?;

    for seed in seeds {
        registry
            .upsert(&seed.symbol, &seed.name, seed.config, seed.enabled)
            .await
            .map_err(|e| anyhow::anyhow!("seeding {}: {e}", seed.symbol))?;
        info!("registered asset {}", seed.symbol);
    }

    Ok(())
}
