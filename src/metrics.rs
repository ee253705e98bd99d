// SPDX-License-Identifier: Apache-2.0

//! Lightweight in-memory federation metrics.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use serde::Serialize;

#[derive(Default)]
struct FederationMetrics {
    federated_queries: AtomicU64,
    node_fetches: AtomicU64,
    node_failures: AtomicU64,
    timeouts: AtomicU64,
    cancelled: AtomicU64,
    discoveries: AtomicU64,
    fetch_total_ms: AtomicU64,
    fetch_max_ms: AtomicU64,
}

static FEDERATION_METRICS: OnceLock<FederationMetrics> = OnceLock::new();

fn metrics() -> &'static FederationMetrics {
    FEDERATION_METRICS.get_or_init(FederationMetrics::default)
}

/// One `all()` call, whatever its fan-out.
pub fn record_federated_query() {
    metrics().federated_queries.fetch_add(1, Ordering::Relaxed);
}

/// One node's part of a federated query.
pub fn record_node_fetch(duration_ms: f64, success: bool) {
    let duration_ms = duration_ms.max(0.0) as u64;
    let metrics = metrics();
    metrics.node_fetches.fetch_add(1, Ordering::Relaxed);
    if !success {
        metrics.node_failures.fetch_add(1, Ordering::Relaxed);
    }
    metrics
        .fetch_total_ms
        .fetch_add(duration_ms, Ordering::Relaxed);

    let mut current = metrics.fetch_max_ms.load(Ordering::Relaxed);
    while duration_ms > current {
        match metrics.fetch_max_ms.compare_exchange(
            current,
            duration_ms,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(next) => current = next,
        }
    }
}

pub fn record_discovery() {
    metrics().discoveries.fetch_add(1, Ordering::Relaxed);
}

pub fn record_cancel() {
    metrics().cancelled.fetch_add(1, Ordering::Relaxed);
}

pub fn record_timeout() {
    metrics().timeouts.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Serialize)]
pub struct FederationMetricsSnapshot {
    pub federated_queries: u64,
    pub node_fetches: u64,
    pub node_failures: u64,
    pub timeouts: u64,
    pub cancelled: u64,
    pub discoveries: u64,
    pub avg_fetch_ms: Option<f64>,
    pub max_fetch_ms: Option<u64>,
}

pub fn snapshot() -> FederationMetricsSnapshot {
    let metrics = metrics();
    let node_fetches = metrics.node_fetches.load(Ordering::Relaxed);
    let fetch_total = metrics.fetch_total_ms.load(Ordering::Relaxed);
    let max_ms = metrics.fetch_max_ms.load(Ordering::Relaxed);

    let avg_fetch_ms = if node_fetches > 0 {
        Some(fetch_total as f64 / node_fetches as f64)
    } else {
        None
    };

    FederationMetricsSnapshot {
        federated_queries: metrics.federated_queries.load(Ordering::Relaxed),
        node_fetches,
        node_failures: metrics.node_failures.load(Ordering::Relaxed),
        timeouts: metrics.timeouts.load(Ordering::Relaxed),
        cancelled: metrics.cancelled.load(Ordering::Relaxed),
        discoveries: metrics.discoveries.load(Ordering::Relaxed),
        avg_fetch_ms,
        max_fetch_ms: if max_ms > 0 { Some(max_ms) } else { None },
    }
}
