use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` (a filter
/// directive such as `info` or `chess_agent=debug`) applies.
pub fn init_logging(default_level: &str) -> Result<(), tracing::subscriber::SetGlobalDefaultError> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
}
