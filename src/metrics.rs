use axum::{routing::get, Router};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Initialize the Prometheus recorder for the process.
    pub fn init() -> Self {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .expect("prometheus: install recorder");
        Self { handle }
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

pub fn record_request(intent: &str, cache_hit: bool) {
    counter!("pipeline_requests_total", "intent" => intent.to_string()).increment(1);
    if cache_hit {
        counter!("pipeline_cache_hits_total").increment(1);
    }
}

pub fn record_total_latency_ms(value: f64) {
    histogram!("pipeline_total_latency_ms").record(value);
}

pub fn record_stage_latency_ms(stage: &str, value: f64) {
    histogram!("pipeline_stage_latency_ms", "stage" => stage.to_string()).record(value);
}

pub fn record_error(kind: &str) {
    counter!("pipeline_errors_total", "kind" => kind.to_string()).increment(1);
}

pub fn set_classification_cache_size(size: f64) {
    gauge!("pipeline_classification_cache_entries").set(size);
}

pub fn set_response_cache_size(size: f64) {
    gauge!("pipeline_response_cache_entries").set(size);
}
