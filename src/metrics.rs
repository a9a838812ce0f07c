//! Metrics (Prometheus via OpenTelemetry) and tracing span helpers.

#[cfg(feature = "metrics")]
pub use prometheus_metrics::{BridgeMetrics, METRICS};

#[cfg(feature = "metrics")]
mod prometheus_metrics {
    use once_cell::sync::Lazy;
    use opentelemetry::{
        metrics::{Counter, Histogram, MeterProvider, UpDownCounter},
        KeyValue,
    };
    use opentelemetry_sdk::metrics::SdkMeterProvider;
    use prometheus::{Encoder, Registry, TextEncoder};
    use std::time::Duration;

    pub static METRICS: Lazy<BridgeMetrics> = Lazy::new(BridgeMetrics::init);

    pub struct BridgeMetrics {
        pub registry: Registry,
        provider: SdkMeterProvider,
        pub operations_total: Counter<u64>,
        pub operation_errors_total: Counter<u64>,
        pub operation_duration: Histogram<f64>,
        pub connection_wait_duration: Histogram<f64>,
        pub acquisition_retries_total: Counter<u64>,
        pub remote_clients: UpDownCounter<i64>,
    }

    impl BridgeMetrics {
        pub fn init() -> Self {
            let registry = Registry::new();
            let exporter = opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
                .expect("failed to build prometheus exporter");
            let provider = SdkMeterProvider::builder().with_reader(exporter).build();
            let meter = provider.meter("bridgehead");

            let operations_total = meter
                .u64_counter("bridgehead_operations_total")
                .with_description("Total dispatched schema operations")
                .build();

            let operation_errors_total = meter
                .u64_counter("bridgehead_operation_errors_total")
                .with_description("Dispatched schema operations that returned an error")
                .build();

            let operation_duration = meter
                .f64_histogram("bridgehead_operation_duration_seconds")
                .with_description("Duration of dispatched schema operations")
                .build();

            let connection_wait_duration = meter
                .f64_histogram("bridgehead_connection_wait_seconds")
                .with_description("Time spent acquiring backend connections")
                .build();

            let acquisition_retries_total = meter
                .u64_counter("bridgehead_acquisition_retries_total")
                .with_description("Connection acquisition attempts that were retried")
                .build();

            let remote_clients = meter
                .i64_up_down_counter("bridgehead_remote_clients")
                .with_description("Remote clients bound to open units of work")
                .build();

            Self {
                registry,
                provider,
                operations_total,
                operation_errors_total,
                operation_duration,
                connection_wait_duration,
                acquisition_retries_total,
                remote_clients,
            }
        }

        pub fn record_operation(&self, operation: &'static str, elapsed: Duration, failed: bool) {
            let attrs = [KeyValue::new("operation", operation)];
            self.operations_total.add(1, &attrs);
            if failed {
                self.operation_errors_total.add(1, &attrs);
            }
            self.operation_duration.record(elapsed.as_secs_f64(), &attrs);
        }

        pub fn record_connection_wait(&self, duration: Duration) {
            self.connection_wait_duration
                .record(duration.as_secs_f64(), &[]);
        }

        pub fn record_acquisition_retry(&self) {
            self.acquisition_retries_total.add(1, &[]);
        }

        pub fn remote_clients_changed(&self, delta: i64) {
            self.remote_clients.add(delta, &[]);
        }

        /// Prometheus text exposition of everything recorded so far.
        pub fn encode_text(&self) -> String {
            let mut buffer = Vec::new();
            if let Err(err) = TextEncoder::new().encode(&self.registry.gather(), &mut buffer) {
                log::warn!("Failed to encode metrics: {}", err);
            }
            String::from_utf8(buffer).unwrap_or_default()
        }

        pub fn meter_provider(&self) -> &SdkMeterProvider {
            &self.provider
        }
    }

}

/// Span constructors, entered as `let _span = tracing_helpers::x_span().entered();`.
#[cfg(feature = "tracing")]
pub mod tracing_helpers {
    use tracing::{debug_span, info_span, Span};

    pub fn operation_span(family: &str, operation: &'static str, table: &str) -> Span {
        info_span!("bridgehead.operation", family = family, operation = operation, table = table)
    }

    pub fn begin_transaction_span(unit_of_work: &str) -> Span {
        info_span!("bridgehead.transaction.begin", unit_of_work = unit_of_work)
    }

    pub fn commit_transaction_span(unit_of_work: &str) -> Span {
        info_span!("bridgehead.transaction.commit", unit_of_work = unit_of_work)
    }

    pub fn rollback_transaction_span(unit_of_work: &str) -> Span {
        info_span!("bridgehead.transaction.rollback", unit_of_work = unit_of_work)
    }

    pub fn acquire_connection_span(target: &str) -> Span {
        debug_span!("bridgehead.connection.acquire", target = target)
    }

    pub fn execute_command_span(command: &str) -> Span {
        debug_span!("bridgehead.command.execute", command = command)
    }

    pub fn remote_call_span(remote_type: &str, operation: &str) -> Span {
        debug_span!("bridgehead.remote.call", remote_type = remote_type, operation = operation)
    }
}
