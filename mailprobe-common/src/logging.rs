use std::str::FromStr;

use serde::Deserialize;
use tracing::metadata::LevelFilter;
use tracing_subscriber::{
    Layer, filter::FilterFn, prelude::__tracing_subscriber_SubscriberExt, util::SubscriberInitExt,
};

/// How log lines are rendered on stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Level used when `LOG_LEVEL` is not set.
    #[serde(default)]
    pub level: Option<String>,

    #[serde(default)]
    pub format: LogFormat,
}

fn parse_level(level: &str, fallback: LevelFilter) -> LevelFilter {
    LevelFilter::from_str(level).unwrap_or_else(|_| {
        eprintln!("Invalid log level specified {level}, defaulting to {fallback}");
        fallback
    })
}

/// Installs the global subscriber.
///
/// `LOG_LEVEL` wins over the configured level, which wins over the build
/// default.
pub fn init(config: &LoggingConfig) {
    let default = if cfg!(debug_assertions) {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    let configured = config
        .level
        .as_deref()
        .map_or(default, |level| parse_level(level, default));

    let level = std::env::var("LOG_LEVEL")
        .map_or(configured, |level| parse_level(level.as_str(), configured));

    let targets = FilterFn::new(|metadata| {
        metadata.target().starts_with("mailprobe") || metadata.target().starts_with("tower_http")
    });

    let layer = tracing_subscriber::fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::ChronoUtc::rfc_3339());

    let layer = match config.format {
        LogFormat::Compact => layer.compact().with_ansi(true).boxed(),
        LogFormat::Json => layer.json().with_ansi(false).boxed(),
    };

    tracing_subscriber::Registry::default()
        .with(layer.with_filter(level).with_filter(targets))
        .init();
}
