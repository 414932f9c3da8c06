//! Logging initialization

/// Initialize tracing with the `RUST_LOG` filter, falling back to crate-level info.
///
/// Safe to call more than once; repeated initialization is ignored.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "tubedl=info".into());

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
