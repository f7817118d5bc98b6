use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, MeterProvider},
    KeyValue,
};
use prometheus::{Encoder, Registry, TextEncoder};
use std::collections::HashSet;

pub struct Metrics {
    request_counter: Counter<u64>,
    command_counter: Counter<u64>,
    prediction_duration: Histogram<u64>,
    stream_fps: Gauge<f64>,
    robot_battery: Gauge<f64>,
    pub registry: Registry,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let exporter = opentelemetry_prometheus::exporter()
            .with_registry(registry.clone())
            .build()?;

        let provider = opentelemetry_sdk::metrics::SdkMeterProvider::builder()
            .with_reader(exporter)
            .build();

        let meter = provider.meter("smarttrail");
        global::set_meter_provider(provider);

        let request_counter = meter
            .u64_counter("requests_total")
            .with_description("Total number of requests")
            .build();

        let command_counter = meter
            .u64_counter("robot_commands_total")
            .with_description("Robot commands received, by action")
            .build();

        let boundaries = generate_boundaries((15, 30, 60, 500, 1000));

        let prediction_duration = meter
            .u64_histogram("prediction_duration_ms")
            .with_boundaries(boundaries)
            .with_description("Duration of prediction round trips in milliseconds")
            .build();

        let stream_fps = meter
            .f64_gauge("stream_fps")
            .with_description("Frames per second delivered to a video feed client")
            .build();

        let robot_battery = meter
            .f64_gauge("robot_battery_percent")
            .with_description("Last reported robot battery level")
            .build();

        Ok(Metrics {
            request_counter,
            command_counter,
            prediction_duration,
            stream_fps,
            robot_battery,
            registry,
        })
    }

    /// Prometheus text exposition of everything recorded so far.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    pub fn record_request(&self, route: &str) {
        let attributes = [KeyValue::new("route", route.to_string())];
        self.request_counter.add(1, &attributes);
    }

    /// `action` must come from a fixed set, see `robot::command_label`.
    pub fn record_command(&self, action: &'static str) {
        let attributes = [KeyValue::new("action", action)];
        self.command_counter.add(1, &attributes);
    }

    pub fn record_prediction_duration(&self, duration_ms: u64, source: &str) {
        let attributes = [KeyValue::new("source", source.to_string())];
        self.prediction_duration.record(duration_ms, &attributes);
    }

    pub fn record_stream_fps(&self, fps: f64) {
        self.stream_fps.record(fps, &[]);
    }

    pub fn record_battery(&self, battery: f64) {
        self.robot_battery.record(battery, &[]);
    }
}

fn generate_boundaries(parts: (i32, i32, i32, i32, i32)) -> Vec<f64> {
    let first_step: usize = 10;
    let middle_step: usize = 2;
    let end_step: usize = 20;
    let tail_step: usize = 100;
    let first_part = (parts.0..=parts.1).step_by(first_step);
    let middle_part = (parts.1..=parts.2).step_by(middle_step);
    let end_part = (parts.2..=parts.3).step_by(end_step);
    let tail_part = (parts.3..=parts.4).step_by(tail_step);

    let mut seen = HashSet::new();
    first_part
        .chain(middle_part)
        .chain(end_part)
        .chain(tail_part)
        .filter(|&x| seen.insert(x))
        .map(|x| x as f64)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot::command_label;
    use serde_json::json;

    #[test]
    fn test_generate_boundaries() {
        let parts = (2, 22, 26, 46, 146);
        let get = generate_boundaries(parts);
        let expected = vec![2.0, 12.0, 22.0, 24.0, 26.0, 46.0, 146.0];

        assert_eq!(get, expected);
    }

    #[test]
    fn test_recorded_metrics_are_exported() {
        let metrics = Metrics::new().unwrap();
        metrics.record_command(command_label(Some(&json!("follow"))));
        metrics.record_command(command_label(Some(&json!("rm -rf /"))));
        metrics.record_battery(97.5);

        let exposition = metrics.render().unwrap();

        assert!(exposition.contains("robot_commands_total"));
        assert!(exposition.contains(r#"action="follow""#));
        assert!(exposition.contains(r#"action="unknown""#));
        assert!(!exposition.contains("rm -rf"));
        assert!(exposition.contains("robot_battery_percent"));
    }
}
