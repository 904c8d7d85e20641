use crate::error::{Result, ServiceError};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Service configuration parsed from environment variables
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub port: u16,
    pub output_dir: PathBuf,
    pub artifact_extension: String,
    pub content_type: String,
    pub max_artifact_age: Duration,
    pub sweep_interval: Duration,
    pub shutdown_timeout: Duration,
    pub max_text_chars: usize,
    pub synth_url: String,
    pub synth_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            port: 8001,
            output_dir: PathBuf::from("output"),
            artifact_extension: "wav".to_string(),
            content_type: "audio/wav".to_string(),
            max_artifact_age: Duration::from_secs(60 * 60), // 1 hour
            sweep_interval: Duration::from_secs(5 * 60),    // 5 minutes
            shutdown_timeout: Duration::from_secs(5),
            max_text_chars: artifact_cache::DEFAULT_MAX_TEXT_CHARS,
            synth_url: "http://localhost:5002/api/tts".to_string(),
            synth_timeout: Duration::from_secs(120),
        }
    }
}

impl ServiceConfig {
    /// Parse configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Parse configuration from any key lookup, falling back to defaults.
    ///
    /// A variable that is set but unparsable is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            port: parse(&lookup, "PORT")?.unwrap_or(defaults.port),
            output_dir: lookup("OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            artifact_extension: lookup("ARTIFACT_EXTENSION")
                .map(|ext| ext.trim_start_matches('.').to_string())
                .unwrap_or(defaults.artifact_extension),
            content_type: lookup("CONTENT_TYPE").unwrap_or(defaults.content_type),
            max_artifact_age: seconds(&lookup, "MAX_ARTIFACT_AGE_SECS")?
                .unwrap_or(defaults.max_artifact_age),
            sweep_interval: seconds(&lookup, "SWEEP_INTERVAL_SECS")?
                .unwrap_or(defaults.sweep_interval),
            shutdown_timeout: seconds(&lookup, "SHUTDOWN_TIMEOUT_SECS")?
                .unwrap_or(defaults.shutdown_timeout),
            max_text_chars: parse(&lookup, "MAX_TEXT_CHARS")?.unwrap_or(defaults.max_text_chars),
            synth_url: lookup("SYNTH_URL").unwrap_or(defaults.synth_url),
            synth_timeout: seconds(&lookup, "SYNTH_TIMEOUT_SECS")?
                .unwrap_or(defaults.synth_timeout),
        };

        if config.artifact_extension.is_empty() {
            return Err(ServiceError::Config(
                "ARTIFACT_EXTENSION cannot be empty".to_string(),
            ));
        }
        if config.max_text_chars == 0 {
            return Err(ServiceError::Config(
                "MAX_TEXT_CHARS must be positive".to_string(),
            ));
        }

        Ok(config)
    }
}

fn parse<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ServiceError::Config(format!("{} has invalid value {:?}", key, raw))),
    }
}

/// A positive number of seconds
fn seconds(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<Duration>> {
    match parse::<u64>(lookup, key)? {
        Some(0) => Err(ServiceError::Config(format!("{} must be positive", key))),
        other => Ok(other.map(Duration::from_secs)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<ServiceConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServiceConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 8001);
        assert_eq!(config.output_dir, PathBuf::from("output"));
        assert_eq!(config.artifact_extension, "wav");
        assert_eq!(config.max_artifact_age, Duration::from_secs(3600));
        assert_eq!(config.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_overrides() {
        let config = config_from(&[
            ("PORT", "9000"),
            ("OUTPUT_DIR", "/var/cache/tts"),
            ("ARTIFACT_EXTENSION", ".mp3"),
            ("CONTENT_TYPE", "audio/mpeg"),
            ("MAX_ARTIFACT_AGE_SECS", "60"),
            ("SWEEP_INTERVAL_SECS", "10"),
            ("SHUTDOWN_TIMEOUT_SECS", "2"),
        ])
        .unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.output_dir, PathBuf::from("/var/cache/tts"));
        assert_eq!(config.artifact_extension, "mp3");
        assert_eq!(config.content_type, "audio/mpeg");
        assert_eq!(config.max_artifact_age, Duration::from_secs(60));
        assert_eq!(config.sweep_interval, Duration::from_secs(10));
        assert_eq!(config.shutdown_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = config_from(&[("PORT", "not-a-port")]).unwrap_err();
        assert!(err.to_string().contains("PORT"));

        let err = config_from(&[("SWEEP_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(err.to_string().contains("must be positive"));

        assert!(config_from(&[("MAX_TEXT_CHARS", "0")]).is_err());
        assert!(config_from(&[("ARTIFACT_EXTENSION", ".")]).is_err());
    }
}
