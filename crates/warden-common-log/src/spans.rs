//! Span constructors shared by the Warden crates.

use tracing::{info_span, Span};

/// Span covering one admission decision.
pub fn request_span(method: &str, path: &str) -> Span {
    info_span!("request", method = %method, path = %path, ip = tracing::field::Empty)
}

/// Span for an outbound OAuth provider call.
pub fn provider_span(provider: &str, operation: &str) -> Span {
    info_span!("provider", name = %provider, op = %operation)
}

/// Span for a persistence operation on a backing store.
pub fn store_span(store: &str, operation: &str) -> Span {
    info_span!("store", name = %store, op = %operation)
}

/// Record the resolved client address on the current request span.
pub fn record_ip(ip: &str) {
    Span::current().record("ip", tracing::field::display(ip));
}

/// Timing utility for operations.
pub struct Timer {
    start: std::time::Instant,
    operation: &'static str,
}

impl Timer {
    /// Start a new timer.
    pub fn start(operation: &'static str) -> Self {
        Self {
            start: std::time::Instant::now(),
            operation,
        }
    }

    /// Complete the timer and record duration.
    pub fn finish(self) {
        let duration = self.start.elapsed();
        tracing::debug!(
            operation = %self.operation,
            duration_ms = %duration.as_millis(),
            "operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing::Instrument;
    use tracing_subscriber::EnvFilter;

    fn with_subscriber<F>(f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let subscriber = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(EnvFilter::new("trace"))
            .finish();

        tracing::subscriber::with_default(subscriber, f);
    }

    #[test]
    fn test_nested_spans() {
        with_subscriber(|| {
            let request = request_span("GET", "/api/whoami");
            let _outer = request.enter();
            record_ip("10.0.0.1");

            let store = store_span("file_users", "persist");
            let _inner = store.enter();
            tracing::info!("nested operation");
        });
    }

    #[test]
    fn test_timer() {
        with_subscriber(|| {
            let timer = Timer::start("argon2_verify");
            std::thread::sleep(std::time::Duration::from_millis(5));
            timer.finish();
        });
    }

    #[tokio::test]
    async fn test_provider_span_instruments_future() {
        let value = async { 7 }
            .instrument(provider_span("github", "user_info"))
            .await;
        assert_eq!(value, 7);
    }
}
