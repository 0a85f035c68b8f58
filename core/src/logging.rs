//! Structured logging setup: `tracing` + `tracing-subscriber`, filtered by
//! `RUST_LOG` with this crate's module path as the default filter target.

pub fn setup() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "telemetry_core=info".into()),
        )
        .init();
}
