// Copyright (c) Chime, Inc.
// SPDX-License-Identifier: Apache-2.0

use chime_indexer::dispatcher::EventDispatcher;
use chime_indexer::http_stream::HttpStreamClient;
use chime_indexer::metrics::{start_metrics_service, IndexerMetrics};
use chime_indexer::registry::{PairRegistry, StaticPairRegistry};
use chime_indexer::store::MemoryAlarmStore;
use chime_indexer::subscription::{RestartPolicy, SubscriptionManager};
use clap::Parser;
use prometheus::Registry;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(rename_all = "kebab-case", author, version)]
struct Args {
    /// JSON file listing the trading pairs and their oracle contracts
    #[clap(env, long, default_value = "pairs.json")]
    pairs_file: PathBuf,
    /// Base URL of the oracle event gateway
    #[clap(env, long)]
    stream_endpoint: String,
    #[clap(env, long, default_value = "0.0.0.0:9184")]
    metrics_address: SocketAddr,
    #[clap(env, long, default_value = "3")]
    poll_interval_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let cancel = CancellationToken::new();

    let registry = Registry::new();
    let metrics = Arc::new(IndexerMetrics::new(&registry));
    let metrics_handle =
        start_metrics_service(args.metrics_address, registry, cancel.child_token()).await?;

    let pairs = StaticPairRegistry::from_file(&args.pairs_file)?;
    info!(
        pairs = pairs.list_pairs().len(),
        "loaded pair registry from {}",
        args.pairs_file.display()
    );

    let store = Arc::new(MemoryAlarmStore::new());
    let dispatcher = Arc::new(EventDispatcher::new(store.clone(), metrics.clone()));
    let stream_client = Arc::new(HttpStreamClient::new(
        args.stream_endpoint,
        Duration::from_secs(args.poll_interval_secs),
    )?);
    let manager = SubscriptionManager::new(
        store,
        dispatcher,
        stream_client,
        metrics,
        RestartPolicy::default(),
        cancel.child_token(),
    );

    let started = manager.ensure_all(&pairs).await;
    info!(started, "subscriptions running");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    cancel.cancel();
    manager.shutdown().await;
    metrics_handle.await?;
    Ok(())
}
