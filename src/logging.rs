use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Picks the level from `-v` count first, then the config's `log_level`.
pub fn level(verbosity: u8, configured: Option<&str>) -> Level {
    match verbosity {
        0 => configured
            .and_then(|s| s.parse().ok())
            .unwrap_or(Level::INFO),
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

pub fn init(level: Level) -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
