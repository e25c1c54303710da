use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::poll::PollPolicy;

/// Runtime settings loaded from the environment (and `.env`, if present).
///
/// | Env Var                   | Default                    |
/// |---------------------------|----------------------------|
/// | `STABILITY_API_KEY`       | (none)                     |
/// | `STABILITY_API_BASE`      | `https://api.stability.ai` |
/// | `STABILITY_IMAGE_ENGINE`  | `stable-diffusion-v1-6`    |
/// | `POLL_INTERVAL_SECS`      | `10`                       |
/// | `POLL_MAX_ATTEMPTS`       | `60`                       |
/// | `REQUEST_TIMEOUT_SECS`    | `300`                      |
/// | `OUTPUT_DIR`              | `output`                   |
/// | `BATCH_WORKERS`           | `5`                        |
#[derive(Debug, Clone)]
pub struct Settings {
    /// Missing key is only fatal for commands that talk to the API.
    pub api_key: Option<String>,
    pub api_base: String,
    pub image_engine: String,
    pub poll: PollPolicy,
    pub request_timeout: Duration,
    pub output_dir: PathBuf,
    pub batch_workers: usize,
}

impl Settings {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let api_key = lookup("STABILITY_API_KEY")
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty());
        let api_base = lookup("STABILITY_API_BASE")
            .unwrap_or_else(|| "https://api.stability.ai".into())
            .trim_end_matches('/')
            .to_string();
        let image_engine =
            lookup("STABILITY_IMAGE_ENGINE").unwrap_or_else(|| "stable-diffusion-v1-6".into());

        let poll_interval: u64 = parse_or(&lookup, "POLL_INTERVAL_SECS", 10)?;
        let max_attempts: u32 = parse_or(&lookup, "POLL_MAX_ATTEMPTS", 60)?;
        let request_timeout: u64 = parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 300)?;
        let batch_workers: usize = parse_or(&lookup, "BATCH_WORKERS", 5)?;

        Ok(Self {
            api_key,
            api_base,
            image_engine,
            poll: PollPolicy {
                interval: Duration::from_secs(poll_interval),
                max_attempts: max_attempts.max(1),
            },
            request_timeout: Duration::from_secs(request_timeout),
            output_dir: lookup("OUTPUT_DIR").unwrap_or_else(|| "output".into()).into(),
            batch_workers: batch_workers.max(1),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} must be a number, got {raw:?}")),
        None => Ok(default),
    }
}
