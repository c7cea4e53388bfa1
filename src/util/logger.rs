use log::SetLoggerError;

/// Install `env_logger` as the logger, filtering at `info` unless `RUST_LOG` says otherwise.
///
/// The collector only logs through the `log` facade. Without the `builtin_env_logger` feature
/// this does nothing, and a host VM that owns the logger installs its own.
pub fn try_init() -> Result<(), SetLoggerError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "builtin_env_logger")] {
            let env = env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info");
            env_logger::Builder::from_env(env).format_timestamp_millis().try_init()
        } else {
            Ok(())
        }
    }
}
