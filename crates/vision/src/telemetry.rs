/// Key under which the centre line is published.
pub const CENTER_LINE_KEY: &str = "centerLine";

/// Sink for scalar telemetry published by the vision loop.
pub trait TelemetryPublisher: Send + Sync {
    fn put_number(&self, key: &str, value: f64);
}
