use std::env;

use tracing::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use crate::env::parse_env_or;

pub const SVC_LABEL_ENVVAR: &str = "TESSERA_SVC_LABEL";
pub const LOG_ANSI_ENVVAR: &str = "TESSERA_LOG_ANSI";

pub struct LoggerConfig {
    whoami: String,
    ansi: bool,
}

impl LoggerConfig {
    /// Creates a new empty instance with whoami set.
    pub fn new(whoami: String) -> Self {
        Self {
            whoami,
            ansi: parse_env_or(LOG_ANSI_ENVVAR, true),
        }
    }

    pub fn with_base_name(s: &str) -> Self {
        Self::new(get_whoami_string(s))
    }

    pub fn whoami(&self) -> &str {
        &self.whoami
    }

    pub fn set_ansi(&mut self, ansi: bool) {
        self.ansi = ansi;
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self::with_base_name("(tessera-node)")
    }
}

/// Initializes the logging subsystem with the provided config.
pub fn init(config: LoggerConfig) {
    let filt = tracing_subscriber::EnvFilter::from_default_env();

    // Stdout logging.
    let stdout_sub = tracing_subscriber::fmt::layer()
        .compact()
        .with_ansi(config.ansi)
        .with_filter(filt);

    tracing_subscriber::registry().with(stdout_sub).init();

    info!(whoami = %config.whoami, "logging started");
}

/// Gets the service label from the standard envvar, which should be included
/// in the whoami string.
pub fn get_service_label_from_env() -> Option<String> {
    env::var(SVC_LABEL_ENVVAR).ok()
}

/// Computes a standard whoami string.
pub fn get_whoami_string(base: &str) -> String {
    match get_service_label_from_env() {
        Some(label) => format!("{base}%{label}"),
        None => base.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whoami_includes_label() {
        // Only test that touches the envvar.
        env::set_var(SVC_LABEL_ENVVAR, "seq1");
        assert_eq!(get_whoami_string("node"), "node%seq1");
        assert_eq!(LoggerConfig::with_base_name("node").whoami(), "node%seq1");

        env::remove_var(SVC_LABEL_ENVVAR);
        assert_eq!(get_whoami_string("node"), "node");
    }
}
