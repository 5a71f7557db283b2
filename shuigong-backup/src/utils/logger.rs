//! Tracing subscriber setup for the CLI.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG`, when set, wins over `level`.
pub fn init(level: &str) -> anyhow::Result<()> {
    let env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(level, env.as_deref())?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install logger: {e}"))
}

/// Directives from the environment are parsed strictly; an unparseable
/// configured level falls back to `info`.
fn build_filter(level: &str, env: Option<&str>) -> anyhow::Result<EnvFilter> {
    match env.filter(|directives| !directives.trim().is_empty()) {
        Some(directives) => Ok(EnvFilter::try_new(directives)?),
        None => Ok(EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))),
    }
}
