use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber.
///
/// `RUST_LOG` takes precedence over the configured filter unless `forced`
/// is set, which is the case when the filter came from the command line.
pub fn init(config: &LoggingConfig, forced: bool) -> anyhow::Result<()> {
    let filter = if forced {
        EnvFilter::try_new(&config.filter)?
    } else {
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.filter))?
    };

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry.with(fmt::layer().json()).try_init()?;
    } else {
        registry.with(fmt::layer()).try_init()?;
    }
    Ok(())
}
