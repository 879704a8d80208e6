//! Component metrics via the `metrics` facade.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Metrics recorder for one component instance.
///
/// Emits to whatever recorder the embedding process installs; without one the
/// calls are no-ops.
pub struct ComponentMetrics {
    component: String,
    datastore: String,
}

impl ComponentMetrics {
    /// Create a recorder labelled with the component and datastore names.
    pub fn new(component: &str, datastore: &str) -> Self {
        Self {
            component: component.to_string(),
            datastore: datastore.to_string(),
        }
    }

    /// One record handed to the pipeline.
    pub fn record_received(&self) {
        counter!(
            "tabular_connect_records_received_total",
            "component" => self.component.clone(),
            "datastore" => self.datastore.clone()
        )
        .increment(1);
    }

    /// One record processed successfully.
    pub fn record_success(&self) {
        counter!(
            "tabular_connect_records_success_total",
            "component" => self.component.clone(),
            "datastore" => self.datastore.clone()
        )
        .increment(1);
    }

    /// One operation rejected under the soft failure policy.
    pub fn record_rejected(&self) {
        counter!(
            "tabular_connect_records_rejected_total",
            "component" => self.component.clone(),
            "datastore" => self.datastore.clone()
        )
        .increment(1);
    }

    /// One error of the given kind.
    pub fn record_error(&self, kind: &str) {
        counter!(
            "tabular_connect_errors_total",
            "component" => self.component.clone(),
            "datastore" => self.datastore.clone(),
            "kind" => kind.to_string()
        )
        .increment(1);
    }

    /// Time spent handing one record downstream.
    pub fn record_processing_time(&self, duration: Duration) {
        histogram!(
            "tabular_connect_processing_duration_seconds",
            "component" => self.component.clone(),
            "datastore" => self.datastore.clone()
        )
        .record(duration.as_secs_f64());
    }

    /// Component health indicator.
    pub fn set_health(&self, healthy: bool) {
        gauge!(
            "tabular_connect_health",
            "component" => self.component.clone(),
            "datastore" => self.datastore.clone()
        )
        .set(if healthy { 1.0 } else { 0.0 });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_without_recorder_are_noops() {
        // No recorder installed in tests; every call must simply not panic.
        let metrics = ComponentMetrics::new("orders_input", "postgres");
        metrics.record_received();
        metrics.record_success();
        metrics.record_rejected();
        metrics.record_error("backend");
        metrics.record_processing_time(Duration::from_millis(12));
        metrics.set_health(true);
        metrics.set_health(false);
    }
}
