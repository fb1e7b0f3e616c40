//! Log output on stderr. stdout is reserved for the command's JSON result.

use tracing_subscriber::{fmt, EnvFilter};

/// Env switch for JSON-lines log output.
pub const LOG_JSON_ENV: &str = "STAKEFLEET_LOG_JSON";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat { #[default] Pretty, Json }

impl LogFormat {
    pub fn from_flag(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v == "1" || v.eq_ignore_ascii_case("true") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Install the stderr subscriber. `RUST_LOG` filters (default `info`); calling twice is a no-op.
pub fn init_logging() {
    let flag = std::env::var(LOG_JSON_ENV).ok();
    init_logging_with(LogFormat::from_flag(flag.as_deref()));
}

pub fn init_logging_with(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt::Subscriber::builder().with_env_filter(filter).with_writer(std::io::stderr);

    let _ = match format {
        LogFormat::Json => builder.json().with_target(false).try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
}
