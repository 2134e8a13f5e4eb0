//! Process-wide `tracing` subscriber setup.

use std::env;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::config::{LogFormat, Logging};

/// Directives used when `RUST_LOG` is not set.
///
/// Dependencies stay at `warn` or quieter; only this crate follows the
/// configured level.
fn default_directives(level: LevelFilter) -> String {
    if level == LevelFilter::OFF {
        return "off".to_owned();
    }
    let deps = level.min(LevelFilter::WARN);
    format!("{},cat_cache={}", directive(deps), directive(level))
}

fn directive(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::OFF => "off",
        LevelFilter::ERROR => "error",
        LevelFilter::WARN => "warn",
        LevelFilter::INFO => "info",
        LevelFilter::DEBUG => "debug",
        _ => "trace",
    }
}

/// Installs the global subscriber.
///
/// `RUST_LOG` takes precedence over `logging.level`. Must be called once,
/// before the runtime starts serving requests.
pub fn init_logging(config: &Logging) {
    let directives =
        env::var("RUST_LOG").unwrap_or_else(|_| default_directives(config.level));

    let fmt_layer = {
        let layer = tracing_subscriber::fmt::layer().with_target(true);

        match config.format {
            LogFormat::Pretty => layer.pretty().boxed(),
            LogFormat::Compact => layer.compact().with_ansi(false).boxed(),
            LogFormat::Json => layer
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .with_span_list(true)
                .boxed(),
        }
    }
    .with_filter(EnvFilter::new(directives));

    tracing_subscriber::registry().with(fmt_layer).init();
}

/// Logs an error to the configured logger or `stderr` if not yet configured.
pub fn ensure_log_error(error: &anyhow::Error) {
    if tracing::Level::ERROR <= tracing::level_filters::STATIC_MAX_LEVEL
        && tracing::Level::ERROR <= LevelFilter::current()
    {
        tracing::error!("{:?}", error);
    } else {
        eprintln!("{error:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crate_follows_configured_level() {
        assert_eq!(default_directives(LevelFilter::INFO), "warn,cat_cache=info");
        assert_eq!(default_directives(LevelFilter::DEBUG), "warn,cat_cache=debug");
        assert_eq!(default_directives(LevelFilter::ERROR), "error,cat_cache=error");
        assert_eq!(default_directives(LevelFilter::TRACE), "warn,cat_cache=trace");
        assert_eq!(default_directives(LevelFilter::OFF), "off");
    }

    #[test]
    fn directives_parse() {
        for level in [LevelFilter::TRACE, LevelFilter::DEBUG, LevelFilter::WARN] {
            assert!(EnvFilter::try_new(default_directives(level)).is_ok());
        }
    }
}
