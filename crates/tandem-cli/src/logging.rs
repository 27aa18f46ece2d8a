use anyhow::{Context, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Installs a stderr subscriber. `RUST_LOG` takes precedence over the
/// configured filter so a single run can be made chattier.
pub fn init_tracing(config_filter: &str) -> Result<()> {
    let filter = build_env_filter(config_filter)?;
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .with(filter)
        .try_init()
        .context("failed to initialize tracing subscriber")
}

fn build_env_filter(config_filter: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let filter = if config_filter.trim().is_empty() {
        "info"
    } else {
        config_filter
    };
    EnvFilter::try_new(filter).with_context(|| format!("failed to parse log filter '{filter}'"))
}
