/*
* Copyright (C) 2025 Pedro Henrique / phkaiser13
*
* File: src/metrics.rs
*
* Prometheus metrics exposed by the CDN operator, and the small warp server
* that serves them on `/metrics`.
*
* SPDX-License-Identifier: Apache-2.0
*/

use std::net::SocketAddr;
use std::sync::Arc;

use lazy_static::lazy_static;
use prometheus::{
    opts, register_int_counter_vec, register_int_gauge, Encoder, IntCounterVec, IntGauge, Registry,
    TextEncoder,
};
use tracing::{error, info};
use warp::Filter;

lazy_static! {
    /// Reconcile passes, labeled by lifecycle phase (`active` or `deleting`).
    pub static ref RECONCILES: IntCounterVec =
        register_int_counter_vec!(
            "cdn_distribution_reconciles_total",
            "Total number of Distribution reconcile passes.",
            &["phase"]
        ).unwrap();

    /// Failed passes, labeled by error kind.
    pub static ref RECONCILE_ERRORS: IntCounterVec =
        register_int_counter_vec!(
            "cdn_distribution_reconcile_errors_total",
            "Total number of Distribution reconcile passes that ended in an error.",
            &["kind"]
        ).unwrap();

    /// Calls made against a CDN provider's API.
    pub static ref REMOTE_CALLS: IntCounterVec =
        register_int_counter_vec!(
            "cdn_provider_remote_calls_total",
            "Total number of calls made to CDN provider APIs.",
            &["provider", "operation"]
        ).unwrap();

    pub static ref READY: IntGauge =
        register_int_gauge!(opts!(
            "cdn_distribution_ready",
            "Number of Distributions last observed Ready."
        )).unwrap();
}

/// Records a change in a Distribution's readiness.
pub fn observe_ready(before: bool, after: bool) {
    match (before, after) {
        (false, true) => READY.inc(),
        (true, false) => READY.dec(),
        _ => {}
    }
}

/// Creates the registry served on `/metrics`.
pub fn create_and_register_metrics() -> Result<Registry, prometheus::Error> {
    let r = Registry::new();
    r.register(Box::new(RECONCILES.clone()))?;
    r.register(Box::new(RECONCILE_ERRORS.clone()))?;
    r.register(Box::new(REMOTE_CALLS.clone()))?;
    r.register(Box::new(READY.clone()))?;
    Ok(r)
}

fn render(registry: &Registry) -> Result<String, String> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder
        .encode(&registry.gather(), &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

async fn metrics_handler(registry: Arc<Registry>) -> Result<impl warp::Reply, warp::Rejection> {
    let (body, status) = match render(&registry) {
        Ok(body) => (body, warp::http::StatusCode::OK),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (String::new(), warp::http::StatusCode::INTERNAL_SERVER_ERROR)
        }
    };
    Ok(warp::reply::with_status(
        warp::reply::with_header(body, "Content-Type", TextEncoder::new().format_type()),
        status,
    ))
}

/// Serves `/metrics` until the process exits.
pub async fn run_metrics_server(registry: Arc<Registry>, port: u16) {
    let metrics_route = warp::path("metrics")
        .and(warp::get())
        .and(warp::any().map(move || Arc::clone(&registry)))
        .and_then(metrics_handler);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "Starting metrics server");
    warp::serve(metrics_route).run(addr).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_renders_operator_metrics() {
        let registry = create_and_register_metrics().unwrap();
        RECONCILES.with_label_values(&["active"]).inc();

        let body = render(&registry).unwrap();
        assert!(body.contains("cdn_distribution_reconciles_total"));
        assert!(body.contains("cdn_distribution_ready"));
    }
}
