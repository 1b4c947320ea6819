//! Structured logging setup. Built on `tracing` + `tracing-subscriber`'s `EnvFilter`,
//! reading `LOG_LEVEL` (falling back to `INFO`), emitting to stdout.

pub fn init(log_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
