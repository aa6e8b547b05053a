use tracing_subscriber::EnvFilter;

/// Initialise the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` applies to every
/// target (e.g. `"info"` or `"colibri_ws=debug"`).
///
/// ## Panics
///
/// Panics if a global subscriber is already installed, like
/// `tracing_subscriber::fmt().init()`. Call it once, from `main`.
pub fn init_log(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
}
