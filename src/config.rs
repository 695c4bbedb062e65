use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use crate::downloader::DownloadPolicy;
use crate::error::MemorError;
use crate::tools::ToolOverrides;

pub const LOCAL_CONFIG: &str = "memoreasy.json";

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub input: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub connect_timeout_secs: Option<u64>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub video_timeout_secs: Option<u64>,
    #[serde(default)]
    pub chunk_size: Option<usize>,
    #[serde(default)]
    pub tools: ToolOverrides,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub source: Option<PathBuf>,
    pub input: PathBuf,
    pub output_dir: PathBuf,
    pub policy: DownloadPolicy,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub video_timeout: Duration,
    pub tools: ToolOverrides,
}

impl Default for ResolvedConfig {
    fn default() -> Self {
        Self {
            source: None,
            input: PathBuf::from("memories_history.html"),
            output_dir: PathBuf::from("memories"),
            policy: DownloadPolicy::default(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(300),
            video_timeout: Duration::from_secs(300),
            tools: ToolOverrides::default(),
        }
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Explicit path, then `./memoreasy.json`, then the per-user config file, then defaults.
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, MemorError> {
        let config_path = match path {
            Some(path) => Some(PathBuf::from(path)),
            None => Self::candidates().into_iter().find(|candidate| candidate.is_file()),
        };

        let Some(config_path) = config_path else {
            return Ok(ResolvedConfig::default());
        };
        let config = Self::load(&config_path)?;
        let mut resolved = Self::resolve_config(config)?;
        resolved.source = Some(config_path);
        Ok(resolved)
    }

    pub fn load(path: &Path) -> Result<Config, MemorError> {
        let content =
            fs::read_to_string(path).map_err(|_| MemorError::ConfigRead(path.to_path_buf()))?;
        serde_json::from_str(&content).map_err(|err| MemorError::ConfigParse(err.to_string()))
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, MemorError> {
        let defaults = ResolvedConfig::default();

        let max_attempts = config.max_attempts.unwrap_or(defaults.policy.max_attempts);
        if max_attempts == 0 {
            return Err(MemorError::ConfigParse(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        let chunk_size = config.chunk_size.unwrap_or(defaults.policy.chunk_size);
        if chunk_size == 0 {
            return Err(MemorError::ConfigParse(
                "chunk_size must be greater than 0".to_string(),
            ));
        }
        let retry_delay = config
            .retry_delay_ms
            .map(Duration::from_millis)
            .unwrap_or(defaults.policy.retry_delay);

        Ok(ResolvedConfig {
            source: None,
            input: config.input.unwrap_or(defaults.input),
            output_dir: config.output_dir.unwrap_or(defaults.output_dir),
            policy: DownloadPolicy {
                max_attempts,
                retry_delay,
                chunk_size,
            },
            connect_timeout: seconds(
                "connect_timeout_secs",
                config.connect_timeout_secs,
                defaults.connect_timeout,
            )?,
            request_timeout: seconds(
                "request_timeout_secs",
                config.request_timeout_secs,
                defaults.request_timeout,
            )?,
            video_timeout: seconds(
                "video_timeout_secs",
                config.video_timeout_secs,
                defaults.video_timeout,
            )?,
            tools: config.tools,
        })
    }

    fn candidates() -> Vec<PathBuf> {
        let mut candidates = vec![PathBuf::from(LOCAL_CONFIG)];
        if let Some(dirs) = BaseDirs::new() {
            candidates.push(dirs.config_dir().join("memoreasy").join("config.json"));
        }
        candidates
    }
}

fn seconds(key: &str, value: Option<u64>, default: Duration) -> Result<Duration, MemorError> {
    match value {
        None => Ok(default),
        Some(0) => Err(MemorError::ConfigParse(format!(
            "{key} must be greater than 0"
        ))),
        Some(secs) => Ok(Duration::from_secs(secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_falls_back_to_defaults() {
        let resolved = ConfigLoader::resolve_config(Config::default()).unwrap();
        assert_eq!(resolved.policy.max_attempts, 3);
        assert_eq!(resolved.policy.retry_delay, Duration::from_secs(2));
        assert_eq!(resolved.policy.chunk_size, 8192);
        assert_eq!(resolved.request_timeout, Duration::from_secs(300));
        assert_eq!(resolved.output_dir, PathBuf::from("memories"));
    }

    #[test]
    fn zero_timeouts_are_rejected() {
        let config = Config {
            video_timeout_secs: Some(0),
            ..Config::default()
        };
        assert!(ConfigLoader::resolve_config(config).is_err());
    }
}
