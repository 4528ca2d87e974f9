//! Logging setup and request identification.

use uuid::Uuid;

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` overrides the default filter. Noisy HTTP library targets are
/// suppressed regardless of the base filter so that chunked transfer logs
/// do not drown request traces.
pub fn init_tracing(default_level: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let base_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| format!("{},llm_router_rust=debug", default_level));
    let filter_str = format!("{},hyper=warn,h2=warn,reqwest=warn", base_filter);

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(filter_str))
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}

/// Generate a request identifier for log correlation.
pub fn generate_request_id() -> String {
    format!("req-{}", Uuid::new_v4().simple())
}
