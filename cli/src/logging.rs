//! `tracing-subscriber` setup for the CLI binary. `shuttle::logging` only
//! emits `tracing` calls and leaves subscriber setup to the binary crate
//! that consumes it; this is that setup.

pub fn init() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
