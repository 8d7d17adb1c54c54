//! Runtime configuration for the event core, grounded on the dashboard's
//! `from_env` convention: every knob has a sane default and an optional
//! environment-variable override, so tests and embedders never have to
//! construct a config by hand unless they want to change something.

/// Tunables for a single [`crate::gateway::EventGateway`] instance.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Per-agent queue capacity. Overflow drops the newest event.
    pub queue_capacity: usize,
    /// Number of recent events retained in the diagnostic history ring.
    pub history_size: usize,
    /// Fraction of `queue_capacity` (in `[0.0, 1.0]`) at which a mailbox
    /// logs a backpressure warning and bumps a metric, ahead of actually
    /// filling up and dropping events.
    pub backpressure_threshold: f64,
    /// Default timeout applied to `Emit` calls that don't specify one.
    pub default_response_timeout_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            history_size: 10_000,
            backpressure_threshold: 0.8,
            default_response_timeout_ms: 5000,
        }
    }
}

impl NetworkConfig {
    /// Builds a config from defaults overridden by environment variables:
    /// `OPENAGENTS_QUEUE_CAPACITY`, `OPENAGENTS_HISTORY_SIZE`,
    /// `OPENAGENTS_BACKPRESSURE_THRESHOLD`, `OPENAGENTS_DEFAULT_TIMEOUT_MS`.
    /// Unparseable values are ignored.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(v) = std::env::var("OPENAGENTS_QUEUE_CAPACITY") {
            if let Ok(v) = v.parse() {
                config.queue_capacity = v;
            }
        }
        if let Ok(v) = std::env::var("OPENAGENTS_HISTORY_SIZE") {
            if let Ok(v) = v.parse() {
                config.history_size = v;
            }
        }
        if let Ok(v) = std::env::var("OPENAGENTS_BACKPRESSURE_THRESHOLD") {
            if let Ok(v) = v.parse() {
                config.backpressure_threshold = v;
            }
        }
        if let Ok(v) = std::env::var("OPENAGENTS_DEFAULT_TIMEOUT_MS") {
            if let Ok(v) = v.parse() {
                config.default_response_timeout_ms = v;
            }
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = NetworkConfig::default();
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.history_size, 10_000);
        assert!((config.backpressure_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.default_response_timeout_ms, 5000);
    }

    #[test]
    fn backpressure_threshold_reads_from_env() {
        std::env::set_var("OPENAGENTS_BACKPRESSURE_THRESHOLD", "0.5");
        let config = NetworkConfig::from_env();
        assert!((config.backpressure_threshold - 0.5).abs() < f64::EPSILON);
        std::env::remove_var("OPENAGENTS_BACKPRESSURE_THRESHOLD");
    }
}
