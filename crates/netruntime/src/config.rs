use std::time::Duration;

/// Configuration shared by both engine variants
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub event_buffer_size: usize,
    /// How long a caller waits for a case's critical section.
    pub lock_timeout_ms: u64,
    pub or_join_budget: usize,
    pub max_firings_per_step: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            lock_timeout_ms: 5000,
            or_join_budget: 100_000,
            max_firings_per_step: 10_000,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `NETFLOW_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("NETFLOW_EVENT_BUFFER_SIZE") {
            config.event_buffer_size = v;
        }
        if let Some(v) = env_parse("NETFLOW_LOCK_TIMEOUT_MS") {
            config.lock_timeout_ms = v;
        }
        if let Some(v) = env_parse("NETFLOW_OR_JOIN_BUDGET") {
            config.or_join_budget = v;
        }
        if let Some(v) = env_parse("NETFLOW_MAX_FIRINGS_PER_STEP") {
            config.max_firings_per_step = v;
        }
        config
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            or_join_budget: self.or_join_budget,
            max_firings_per_step: self.max_firings_per_step,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring unparsable {}={}", key, raw);
                None
            }
        },
        Err(_) => None,
    }
}

/// Limits applied inside a single case operation.
#[derive(Debug, Clone, Copy)]
pub struct RunnerSettings {
    pub or_join_budget: usize,
    pub max_firings_per_step: usize,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        EngineConfig::default().runner_settings()
    }
}
