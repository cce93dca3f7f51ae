//! Performance metrics for the query engine
//!
//! Counters and histograms are recorded through the `metrics` facade and exposed
//! in Prometheus format once a node installs the exporter.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;

/// Initialize the metrics collection system
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    // Create a Prometheus exporter
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    Ok(())
}

/// Record a completed query
pub fn record_query(duration_ms: f64) {
    histogram!("tsq.query.duration_ms").record(duration_ms);
}

/// Record a task accepted by a task manager
pub fn record_task_submitted() {
    counter!("tsq.tasks.submitted").increment(1);
}

/// Record a task that ended with an error
pub fn record_task_failed() {
    counter!("tsq.tasks.failed").increment(1);
}

pub fn update_queue_depth(depth: usize) {
    gauge!("tsq.tasks.queue_depth").set(depth as f64);
}

/// Record an optimizer rule rewriting a plan node
pub fn record_rule_fired(rule: &'static str) {
    counter!("tsq.optimizer.rule_fired", "rule" => rule).increment(1);
}

/// Record a page delivered to an exchange
pub fn record_exchange_page(rows: usize) {
    counter!("tsq.exchange.pages_received").increment(1);
    histogram!("tsq.exchange.page_rows").record(rows as f64);
}

/// Record bytes put on the wire
pub fn record_rpc_bytes(bytes: usize) {
    counter!("tsq.rpc.bytes_sent").increment(bytes as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_exporter_is_a_noop() {
        // No recorder installed: every call goes to the no-op recorder
        record_query(1.5);
        record_task_submitted();
        record_rule_fired("RemoveIdentityProjection");
        update_queue_depth(3);
    }
}
