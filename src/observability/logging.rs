use env_logger::{Builder, Env};

/// Install the global logger.
///
/// `RUST_LOG` wins over `default_level`. Calling this more than once is a no-op.
pub fn init_logging(default_level: &str) {
    let _ = Builder::from_env(Env::default().default_filter_or(default_level))
        .format_timestamp_millis()
        .try_init();
}
