use proctor_core::{BodyMode, DetectorConfig};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
}

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Daemon configuration: an optional TOML file, then `PROCTOR_*` overrides.
#[derive(Debug, Clone)]
pub struct Config {
    pub detector: DetectorConfig,
    /// Run a warmup frame through every model before serving requests.
    pub warmup: bool,
    /// Upper bound for a single request, including queueing.
    pub request_timeout_secs: u64,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut detector = match var("PROCTOR_CONFIG") {
            Some(path) => read_toml(&path)?,
            None => DetectorConfig::default(),
        };

        if let Some(dir) = var("PROCTOR_MODEL_DIR") {
            detector.model_dir = PathBuf::from(dir);
        }
        detector.head_pose.classifier_confidence = parsed(
            &var,
            "PROCTOR_HEAD_POSE_CONFIDENCE",
            detector.head_pose.classifier_confidence,
        );
        detector.person.confidence = parsed(&var, "PROCTOR_PERSON_CONFIDENCE", detector.person.confidence);
        if let Some(mode) = var("PROCTOR_BODY_MODE") {
            match mode.parse::<BodyMode>() {
                Ok(m) => detector.body_mode = m,
                Err(e) => tracing::warn!(error = %e, "ignoring PROCTOR_BODY_MODE"),
            }
        }

        Ok(Self {
            detector,
            warmup: var("PROCTOR_WARMUP").map(|v| v != "0").unwrap_or(true),
            request_timeout_secs: request_timeout(&var),
        })
    }
}

fn read_toml(path: &str) -> Result<DetectorConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_string(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.to_string(),
        source,
    })
}

/// A zero timeout would fail every request, so it keeps the default.
fn request_timeout(var: &impl Fn(&str) -> Option<String>) -> u64 {
    match parsed(var, "PROCTOR_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS) {
        0 => {
            tracing::warn!("ignoring PROCTOR_REQUEST_TIMEOUT_SECS=0");
            DEFAULT_REQUEST_TIMEOUT_SECS
        }
        secs => secs,
    }
}

fn parsed<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    var(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}
