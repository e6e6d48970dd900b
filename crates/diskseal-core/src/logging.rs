//! Process-wide logger setup for DiskSeal binaries.

use env_logger::Env;

/// Install the global logger with `level` as the default filter.
///
/// `RUST_LOG` still wins when set, so operators can raise verbosity per
/// invocation. Calling this more than once is harmless.
pub fn init(level: &str) {
    let env = Env::default().default_filter_or(level);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_secs()
        .try_init();
}
