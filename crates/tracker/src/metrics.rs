use anyhow::Result;
use metrics::{describe_counter, describe_gauge, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

pub fn describe() {
    describe_counter!(
        "tracker_http_attempts_total",
        "HTTP attempts made, by endpoint and status."
    );
    describe_counter!(
        "tracker_http_calls_total",
        "Logical HTTP calls finished, by endpoint and outcome."
    );
    describe_histogram!(
        "tracker_http_latency_ms",
        "HTTP attempt latency in milliseconds."
    );
    describe_counter!(
        "tracker_proxy_rotations_total",
        "Retries that moved to the next proxy."
    );
    describe_counter!(
        "tracker_wallet_outcomes_total",
        "Wallets resolved, by terminal outcome."
    );
    describe_gauge!(
        "tracker_last_run_resolved",
        "Wallets written to the snapshot in the last run."
    );
}

/// Install the global recorder and serve `/metrics` on `port`. Must be
/// called inside a Tokio runtime; the exporter runs as a spawned task.
pub fn install_prometheus(port: u16) -> Result<PrometheusHandle> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let (recorder, exporter) = PrometheusBuilder::new().with_http_listener(addr).build()?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {e}"))?;
    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "prometheus exporter stopped");
        }
    });
    Ok(handle)
}
