use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{AppConfig, LogFormat};

/// Installs the global tracing subscriber. Safe to call more than once;
/// later calls are ignored.
pub fn init(config: &AppConfig) {
    let filter = EnvFilter::try_new(&config.rust_log)
        .unwrap_or_else(|_| EnvFilter::new("seat_reservation=info"));

    let registry = tracing_subscriber::registry().with(filter);
    let result = match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(false))
            .try_init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    if result.is_ok() {
        tracing::info!(
            environment = %config.environment,
            format = ?config.log_format,
            "Tracing initialised"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_is_harmless() {
        let config = AppConfig {
            environment: "test".into(),
            rust_log: "not a valid [filter".into(),
            log_format: LogFormat::Json,
        };
        init(&config);
        init(&config);
        tracing::debug!("still logging");
    }
}
