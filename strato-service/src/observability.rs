//! Tracing bootstrap for the framework's own diagnostics
//!
//! Internal diagnostics (adapter failures, flush errors, panic reports) go
//! through `tracing`; the user-facing structured sink lives in
//! [`crate::sink`] and is configured separately through
//! [`crate::config::LoggerConfig`].
//!
//! The filter is built from `service.log_level` and accepts full `EnvFilter`
//! directive syntax, so `info,strato_service=debug` turns up only the
//! framework's own spans. Output format follows the environment: `dev` gets
//! compact human-readable lines, everything else gets JSON with flattened
//! fields for log ingestion.

use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::Result;

/// Install the diagnostic subscriber from the service configuration
///
/// Safe to call more than once; only the first installation wins, so tests
/// and embedded uses never panic on a second init.
pub fn init_tracing(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.service.log_level)
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let installed = if config.service.environment == "dev" {
        builder.compact().try_init().is_ok()
    } else {
        builder.json().flatten_event(true).try_init().is_ok()
    };

    if installed {
        tracing::info!(
            service = %config.service.name,
            environment = %config.service.environment,
            sink_batch_size = config.logger.batch_size,
            sink_buffer_size = config.buffer_size(),
            "diagnostics online"
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_never_panics() {
        let config = Config::default();
        init_tracing(&config).unwrap();
        init_tracing(&config).unwrap();
    }

    #[test]
    fn init_accepts_directive_syntax_and_garbage() {
        let mut config = Config::default();
        config.service.log_level = "info,strato_service=debug".to_string();
        init_tracing(&config).unwrap();

        config.service.log_level = "not a directive %%%".to_string();
        init_tracing(&config).unwrap();
    }

    #[test]
    fn production_environment_takes_the_json_path() {
        let mut config = Config::default();
        config.service.environment = "production".to_string();
        init_tracing(&config).unwrap();
    }
}
