use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Total LLM attempts per extraction, including the first.
    pub max_retries: u32,
    /// Base delay in seconds; attempt `n` failing waits `retry_delay_secs * n`.
    pub retry_delay_secs: f64,
    pub attempt_timeout_secs: u64,
    pub batch_size: usize,
    pub concurrency_limit: usize,
    pub cache_enabled: bool,
    /// Cap on cached responses. `None` keeps every response for the process lifetime.
    pub cache_max_entries: Option<usize>,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_secs: 2.0,
            attempt_timeout_secs: 60,
            batch_size: 8,
            concurrency_limit: 5,
            cache_enabled: true,
            cache_max_entries: None,
        }
    }
}

impl ExtractionConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.retry_delay_secs).unwrap_or(Duration::ZERO)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_durations_from_seconds() {
        let config = ExtractionConfig {
            retry_delay_secs: 0.5,
            attempt_timeout_secs: 30,
            ..ExtractionConfig::default()
        };
        assert_eq!(config.retry_delay(), Duration::from_millis(500));
        assert_eq!(config.attempt_timeout(), Duration::from_secs(30));
        assert_eq!(ExtractionConfig::default().retry_delay(), Duration::from_secs(2));

        let negative = ExtractionConfig {
            retry_delay_secs: -1.0,
            ..ExtractionConfig::default()
        };
        assert_eq!(negative.retry_delay(), Duration::ZERO);
    }
}
