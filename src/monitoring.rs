use tracing_subscriber::{fmt, EnvFilter};

use crate::config::log_json_enabled;

/// `RUST_LOG` wins over the `info` default. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    let _ = if log_json_enabled() {
        builder.json().with_current_span(false).try_init()
    } else {
        builder.with_target(false).try_init()
    };
}
