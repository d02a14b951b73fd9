use std::sync::Once;

static INIT: Once = Once::new();

/// Quiet logging for database tests unless RUST_LOG asks for more
pub fn init_test_env() {
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("pickem_ranker=warn"));
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}
