//! Logging initialisation
//!
//! Filter precedence: `RUST_LOG`, then the configured filter, then `info`.
//! Every initialiser uses `try_init`, so a second call (common in tests) is
//! a no-op instead of a panic.
//!
//! ```rust
//! use pastel_mininode::utils::init_logging;
//!
//! init_logging(Some("pastel_mininode=debug"));
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use super::env::env_bool;
use crate::config::LoggingConfig;

fn build_filter(filter: Option<&str>) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(filter.unwrap_or("info"))
}

/// Human-readable logs on stderr.
///
/// Returns false if a global subscriber was already installed.
pub fn init_logging(filter: Option<&str>) -> bool {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_names(true)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(build_filter(filter))
        .try_init()
        .is_ok()
}

/// JSON lines on stderr for log collectors
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) -> bool {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(build_filter(filter))
        .try_init()
        .is_ok()
}

/// Initialise from the `logging` section of the harness config.
///
/// JSON output is used when the config asks for it or `MININODE_LOG_JSON`
/// is set, and falls back to plain output without the `json-logging`
/// feature.
pub fn init_logging_from_config(config: Option<&LoggingConfig>) -> bool {
    let filter = config.and_then(|c| c.filter.as_deref());
    let json = config.map(|c| c.json_format).unwrap_or(false) || env_bool("MININODE_LOG_JSON");

    if json {
        #[cfg(feature = "json-logging")]
        {
            return init_json_logging(filter);
        }
    }
    init_logging(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeated_init_is_harmless() {
        init_logging(Some("debug"));
        assert!(!init_logging(None));
        assert!(!init_logging_from_config(Some(&LoggingConfig {
            filter: Some("trace".to_string()),
            json_format: true,
        })));
    }
}
