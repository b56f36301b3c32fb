// Copyright (c) Chime, Inc.
// SPDX-License-Identifier: Apache-2.0

use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_vec_with_registry, register_int_gauge_with_registry, IntCounter,
    IntCounterVec, IntGauge, IntGaugeVec, Registry, TextEncoder,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug)]
pub struct IndexerMetrics {
    pub(crate) events_received: IntCounterVec,
    pub(crate) events_applied: IntCounterVec,
    pub(crate) validation_errors: IntCounter,
    pub(crate) consistency_errors: IntCounterVec,
    pub(crate) worker_restarts: IntCounterVec,
    pub(crate) active_workers: IntGauge,
    pub(crate) stalled_workers: IntGauge,
    pub(crate) last_processed_lt: IntGaugeVec,
}

impl IndexerMetrics {
    pub fn new(registry: &Registry) -> Self {
        Self {
            events_received: register_int_counter_vec_with_registry!(
                "chime_events_received",
                "Total number of oracle events received from streams, by kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            events_applied: register_int_counter_vec_with_registry!(
                "chime_events_applied",
                "Total number of oracle events applied to the store, by kind",
                &["kind"],
                registry,
            )
            .unwrap(),
            validation_errors: register_int_counter_with_registry!(
                "chime_validation_errors",
                "Total number of events rejected with malformed payloads",
                registry,
            )
            .unwrap(),
            consistency_errors: register_int_counter_vec_with_registry!(
                "chime_consistency_errors",
                "Total number of events referencing alarms the store disagrees about",
                &["error_type"],
                registry,
            )
            .unwrap(),
            worker_restarts: register_int_counter_vec_with_registry!(
                "chime_worker_restarts",
                "Total number of stream worker restarts, by oracle",
                &["oracle"],
                registry,
            )
            .unwrap(),
            active_workers: register_int_gauge_with_registry!(
                "chime_active_workers",
                "Number of currently running stream workers",
                registry,
            )
            .unwrap(),
            stalled_workers: register_int_gauge_with_registry!(
                "chime_stalled_workers",
                "Number of stream workers stopped on a permanent error",
                registry,
            )
            .unwrap(),
            last_processed_lt: register_int_gauge_vec_with_registry!(
                "chime_last_processed_lt",
                "Logical time of the last applied event, by oracle",
                &["oracle"],
                registry,
            )
            .unwrap(),
        }
    }

    pub fn new_for_testing() -> Arc<Self> {
        let registry = Registry::new();
        Arc::new(Self::new(&registry))
    }
}

/// Serve the Prometheus text exposition of `registry` on `/metrics`.
pub async fn start_metrics_service(
    addr: SocketAddr,
    registry: Registry,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let app = axum::Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let registry = registry.clone();
            async move {
                TextEncoder::new()
                    .encode_to_string(&registry.gather())
                    .unwrap_or_else(|e| format!("# encoding error: {e}"))
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("metrics server listening on {}", addr);

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await
        {
            tracing::error!("metrics server error: {:?}", e);
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_construction() {
        let registry = Registry::new();
        let metrics = IndexerMetrics::new(&registry);

        metrics.events_received.with_label_values(&["tick"]).inc();
        metrics
            .consistency_errors
            .with_label_values(&["unknown_alarm"])
            .inc();
        metrics.active_workers.set(3);

        let families = registry.gather();
        assert!(families
            .iter()
            .any(|f| f.get_name() == "chime_events_received"));
    }

    #[test]
    fn test_new_for_testing_registries_are_independent() {
        let a = IndexerMetrics::new_for_testing();
        let b = IndexerMetrics::new_for_testing();
        a.validation_errors.inc();
        assert_eq!(a.validation_errors.get(), 1);
        assert_eq!(b.validation_errors.get(), 0);
    }

    #[tokio::test]
    async fn test_metrics_service_shutdown() {
        let cancel = CancellationToken::new();
        let handle = start_metrics_service(
            "127.0.0.1:0".parse().unwrap(),
            Registry::new(),
            cancel.clone(),
        )
        .await
        .unwrap();
        cancel.cancel();
        handle.await.unwrap();
    }
}
