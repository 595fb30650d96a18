//! Structured logging setup.
//!
//! Two flavours: JSON output for production and a pretty console layout
//! for development. The config file's `disabledLoggers` set masks log
//! classes from the most verbose downward (`info` alone keeps warnings
//! and errors; all three silence the subscriber entirely).

use eyre::Result;
use tracing_subscriber::{
    filter::LevelFilter, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry,
};

use crate::config::models::LogClass;

/// Map the disabled-classes set onto the finest level that stays enabled.
fn level_for_disabled(disabled: &[LogClass]) -> LevelFilter {
    let info = disabled.contains(&LogClass::Info);
    let warning = disabled.contains(&LogClass::Warning);
    let error = disabled.contains(&LogClass::Error);

    match (info, warning, error) {
        (true, true, true) => LevelFilter::OFF,
        (true, true, false) => LevelFilter::ERROR,
        (true, false, _) => LevelFilter::WARN,
        _ => LevelFilter::INFO,
    }
}

fn env_filter(disabled: &[LogClass]) -> EnvFilter {
    let level = level_for_disabled(disabled);
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()))
}

/// Initialize JSON logging (production).
pub fn init_tracing(disabled: &[LogClass]) -> Result<()> {
    Registry::default()
        .with(env_filter(disabled))
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(true)
                .with_target(true),
        )
        .init();
    Ok(())
}

/// Initialize console-friendly logging (development).
pub fn init_console_tracing(disabled: &[LogClass]) -> Result<()> {
    Registry::default()
        .with(env_filter(disabled))
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_target(true),
        )
        .init();
    Ok(())
}
