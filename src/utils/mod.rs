//! Shared helpers: logging setup, environment lookups and timestamps

pub mod env;
pub mod logging;
pub mod time;

pub use env::{env_bool, env_int, env_opt};
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config};
pub use time::current_timestamp;
