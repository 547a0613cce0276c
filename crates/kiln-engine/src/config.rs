use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub const DEFAULT_FAL_API_BASE: &str = "https://fal.run";
pub const DEFAULT_FAL_STORAGE_BASE: &str = "https://rest.alpha.fal.ai";
pub const DEFAULT_GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub api_base: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl ProviderEndpoint {
    pub fn new(api_base: &str, api_key: Option<String>) -> Self {
        Self {
            api_base: api_base.trim().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

/// Fixed-interval polling bounded by an overall job timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollPolicy {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Everything the engine needs from its host; the engine never reads the environment itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    pub fal: ProviderEndpoint,
    pub fal_storage: ProviderEndpoint,
    pub gemini: ProviderEndpoint,
    #[serde(default)]
    pub poll: PollPolicy,
    pub request_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fal: ProviderEndpoint::new(DEFAULT_FAL_API_BASE, None),
            fal_storage: ProviderEndpoint::new(DEFAULT_FAL_STORAGE_BASE, None),
            gemini: ProviderEndpoint::new(DEFAULT_GEMINI_API_BASE, None),
            poll: PollPolicy::default(),
            request_timeout: Duration::from_secs(300),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let fal_key = non_empty_env("FAL_KEY").or_else(|| non_empty_env("FAL_API_KEY"));
        let gemini_key = non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY"));
        let poll = PollPolicy {
            interval: env_seconds("KILN_POLL_INTERVAL_SECS").unwrap_or(defaults.poll.interval),
            timeout: env_seconds("KILN_POLL_TIMEOUT_SECS").unwrap_or(defaults.poll.timeout),
        };
        Self {
            fal: ProviderEndpoint::new(
                &non_empty_env("FAL_API_BASE").unwrap_or(defaults.fal.api_base),
                fal_key.clone(),
            ),
            fal_storage: ProviderEndpoint::new(
                &non_empty_env("FAL_STORAGE_BASE").unwrap_or(defaults.fal_storage.api_base),
                fal_key,
            ),
            gemini: ProviderEndpoint::new(
                &non_empty_env("GEMINI_API_BASE").unwrap_or(defaults.gemini.api_base),
                gemini_key,
            ),
            poll,
            request_timeout: env_seconds("KILN_REQUEST_TIMEOUT_SECS")
                .unwrap_or(defaults.request_timeout),
        }
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_seconds(key: &str) -> Option<Duration> {
    non_empty_env(key)
        .and_then(|value| value.parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
        .and_then(|value| Duration::try_from_secs_f64(value).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_poll_every_ten_seconds_for_ten_minutes() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(10));
        assert_eq!(policy.timeout, Duration::from_secs(600));
    }

    #[test]
    fn out_of_range_seconds_are_ignored() {
        env::set_var("KILN_TEST_HUGE_SECS", "1e20");
        assert_eq!(env_seconds("KILN_TEST_HUGE_SECS"), None);
        env::set_var("KILN_TEST_HUGE_SECS", "2.5");
        assert_eq!(env_seconds("KILN_TEST_HUGE_SECS"), Some(Duration::from_millis(2500)));
        env::set_var("KILN_TEST_HUGE_SECS", "-3");
        assert_eq!(env_seconds("KILN_TEST_HUGE_SECS"), None);
        env::remove_var("KILN_TEST_HUGE_SECS");
    }

    #[test]
    fn endpoint_trims_trailing_slash() {
        let endpoint = ProviderEndpoint::new(" https://fal.run/ ", None);
        assert_eq!(endpoint.api_base, "https://fal.run");
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = EngineConfig::default().with_poll(PollPolicy {
            interval: Duration::from_millis(250),
            timeout: Duration::from_secs(5),
        });
        let raw = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, config);
    }
}
