//! Engine and LLM configuration
//!
//! Configuration is always passed explicitly to constructors. Only the binary
//! reads the process environment, through [`LlmConfig::from_env`].

use crate::error::{RepairError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Delay inserted before each retry's translate call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPacing {
    Fixed {
        #[serde(with = "millis")]
        delay: Duration,
    },
    Exponential {
        #[serde(with = "millis")]
        initial: Duration,
        factor: f64,
        #[serde(with = "millis")]
        max: Duration,
        #[serde(default)]
        jitter: bool,
    },
}

impl RetryPacing {
    pub fn fixed(delay: Duration) -> Self {
        RetryPacing::Fixed { delay }
    }

    pub fn none() -> Self {
        RetryPacing::Fixed {
            delay: Duration::ZERO,
        }
    }

    /// Sleep before `attempt` (1-based). The first attempt is never delayed.
    pub fn delay_before(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }

        match self {
            RetryPacing::Fixed { delay } => *delay,
            RetryPacing::Exponential {
                initial,
                factor,
                max,
                jitter,
            } => {
                let exponent = (attempt - 2) as i32;
                let scaled = initial.as_secs_f64() * factor.powi(exponent);
                let capped = scaled.min(max.as_secs_f64());
                let secs = if *jitter && capped > 0.0 {
                    // Full jitter keeps the upper bound of the un-jittered schedule
                    rand::thread_rng().gen_range(0.0..=capped)
                } else {
                    capped
                };
                Duration::from_secs_f64(secs)
            }
        }
    }
}

impl Default for RetryPacing {
    fn default() -> Self {
        RetryPacing::fixed(Duration::from_secs(1))
    }
}

/// How much failure history a repair prompt carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextPolicy {
    /// Only the immediately preceding failure.
    #[default]
    Bounded,
    /// Every earlier failure of the same run, oldest first.
    FullHistory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_attempts: u32,
    pub pacing: RetryPacing,
    #[serde(with = "opt_millis")]
    pub attempt_timeout: Option<Duration>,
    pub context_policy: ContextPolicy,
    pub max_concurrency: usize,
    pub max_in_flight_translations: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            pacing: RetryPacing::default(),
            attempt_timeout: None,
            context_policy: ContextPolicy::Bounded,
            max_concurrency: 1,
            max_in_flight_translations: 1,
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: EngineConfig = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(RepairError::Config(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.max_concurrency == 0 {
            return Err(RepairError::Config(
                "max_concurrency must be at least 1".to_string(),
            ));
        }
        if self.max_in_flight_translations == 0 {
            return Err(RepairError::Config(
                "max_in_flight_translations must be at least 1".to_string(),
            ));
        }
        if let RetryPacing::Exponential { factor, .. } = self.pacing {
            if factor.is_nan() || factor < 1.0 {
                return Err(RepairError::Config(format!(
                    "exponential pacing factor must be >= 1.0, got {}",
                    factor
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_temperature() -> f64 {
    0.0
}

fn default_max_tokens() -> u32 {
    500
}

impl LlmConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: default_model(),
            base_url: default_base_url(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }

    /// Read `OPENAI_API_KEY`, `OPENAI_MODEL` and `OPENAI_BASE_URL`.
    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| RepairError::Config("OPENAI_API_KEY is not set".to_string()))?;

        let mut config = Self::new(api_key);
        if let Ok(model) = std::env::var("OPENAI_MODEL") {
            config.model = model;
        }
        if let Ok(base_url) = std::env::var("OPENAI_BASE_URL") {
            config.base_url = base_url;
        }
        Ok(config)
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}
