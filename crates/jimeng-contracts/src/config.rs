use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Deserializer};
use serde_json::Value;

pub const DEFAULT_API_URL: &str = "http://127.0.0.1:8000/v1/images/generations";
pub const DEFAULT_IMAGE_OUTPUT_DIR: &str = "./plugins/jimeng/images";
pub const DEFAULT_DRAWING_PREFIXES: &[&str] = &["即梦", "jimeng"];
pub const DEFAULT_CLEAN_INTERVAL_DAYS: f64 = 3.0;
pub const DEFAULT_CLEAN_CHECK_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_MAX_IMAGES: usize = 1;

const AUTH_TOKEN_ENV: &str = "JIMENG_AUTH_TOKEN";
const API_URL_ENV: &str = "JIMENG_API_URL";
const SECONDS_PER_DAY: f64 = 86_400.0;

/// Plugin settings, loaded once when the plugin starts.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfig {
    pub auth_token: String,
    pub api_url: String,
    pub drawing_prefixes: Vec<String>,
    pub image_output_dir: PathBuf,
    /// Retention window in days.
    pub clean_interval: f64,
    /// Seconds between two retention sweeps.
    pub clean_check_interval: u64,
    pub max_images: usize,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawConfig {
    auth_token: Option<String>,
    api_url: Option<String>,
    drawing_prefixes: Option<Vec<String>>,
    image_output_dir: Option<PathBuf>,
    #[serde(deserialize_with = "number_or_numeric_string")]
    clean_interval: Option<f64>,
    #[serde(deserialize_with = "number_or_numeric_string")]
    clean_check_interval: Option<f64>,
    #[serde(deserialize_with = "number_or_numeric_string")]
    max_images: Option<f64>,
}

impl PluginConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("config not found: {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let parsed: Value = serde_json::from_str(raw).context("config is not valid JSON")?;
        Self::from_value(parsed)
    }

    pub fn from_value(value: Value) -> Result<Self> {
        let is_empty = match &value {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => bail!("config must be a JSON object"),
        };
        if is_empty {
            bail!("config not found");
        }
        let raw: RawConfig = serde_json::from_value(value).context("config has invalid fields")?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self> {
        let auth_token = raw
            .auth_token
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| non_empty_env(AUTH_TOKEN_ENV));
        let Some(auth_token) = auth_token else {
            bail!("auth token not found in config");
        };

        let api_url = raw
            .api_url
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .or_else(|| non_empty_env(API_URL_ENV))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let drawing_prefixes = match raw.drawing_prefixes {
            Some(prefixes) => prefixes,
            None => DEFAULT_DRAWING_PREFIXES
                .iter()
                .map(|value| value.to_string())
                .collect(),
        };
        if drawing_prefixes.is_empty() {
            bail!("drawing_prefixes must contain at least one prefix");
        }
        if drawing_prefixes.iter().any(|prefix| prefix.is_empty()) {
            bail!("drawing_prefixes must not contain empty prefixes");
        }

        let clean_interval = raw.clean_interval.unwrap_or(DEFAULT_CLEAN_INTERVAL_DAYS);
        if !clean_interval.is_finite() || clean_interval < 0.0 {
            bail!("clean_interval must be a non-negative number of days, got {clean_interval}");
        }
        if Duration::try_from_secs_f64(clean_interval * SECONDS_PER_DAY).is_err() {
            bail!("clean_interval is too large, got {clean_interval} days");
        }

        let clean_check_interval = whole_number(
            "clean_check_interval",
            raw.clean_check_interval,
            DEFAULT_CLEAN_CHECK_INTERVAL_SECS as f64,
        )?;
        if clean_check_interval == 0 {
            bail!("clean_check_interval must be at least one second");
        }

        let max_images = whole_number("max_images", raw.max_images, DEFAULT_MAX_IMAGES as f64)?;
        if max_images == 0 {
            bail!("max_images must be at least 1");
        }

        Ok(Self {
            auth_token,
            api_url,
            drawing_prefixes,
            image_output_dir: raw
                .image_output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_IMAGE_OUTPUT_DIR)),
            clean_interval,
            clean_check_interval,
            max_images: max_images as usize,
        })
    }

    /// Saturates for hand-built configs that skipped `from_raw` validation.
    pub fn retention_window(&self) -> Duration {
        Duration::try_from_secs_f64(self.clean_interval * SECONDS_PER_DAY)
            .unwrap_or(Duration::MAX)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.clean_check_interval)
    }
}

fn whole_number(key: &str, value: Option<f64>, default: f64) -> Result<u64> {
    let value = value.unwrap_or(default);
    if !value.is_finite() || value < 0.0 {
        bail!("{key} must be a non-negative integer, got {value}");
    }
    Ok(value.trunc() as u64)
}

fn number_or_numeric_string<'de, D>(deserializer: D) -> std::result::Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(number)) => Ok(number.as_f64()),
        Some(Value::String(text)) => text
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("expected a number, got {text:?}"))),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a number, got {other}"
        ))),
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    #[test]
    fn defaults_fill_missing_keys() -> anyhow::Result<()> {
        let config = PluginConfig::from_value(json!({"auth_token": "secret"}))?;
        assert_eq!(config.auth_token, "secret");
        assert_eq!(config.drawing_prefixes, vec!["即梦", "jimeng"]);
        assert_eq!(
            config.image_output_dir,
            PathBuf::from("./plugins/jimeng/images")
        );
        assert_eq!(config.clean_interval, 3.0);
        assert_eq!(config.clean_check_interval, 3600);
        assert_eq!(config.max_images, 1);
        assert_eq!(config.check_interval(), Duration::from_secs(3600));
        assert_eq!(config.retention_window(), Duration::from_secs(3 * 86_400));
        Ok(())
    }

    #[test]
    fn explicit_values_override_defaults() -> anyhow::Result<()> {
        let config = PluginConfig::from_value(json!({
            "auth_token": "secret",
            "api_url": "http://api.local/v1/images/generations",
            "drawing_prefixes": ["draw"],
            "image_output_dir": "/tmp/jimeng",
            "clean_interval": 0.5,
            "clean_check_interval": 60,
            "max_images": 4,
        }))?;
        assert_eq!(config.api_url, "http://api.local/v1/images/generations");
        assert_eq!(config.drawing_prefixes, vec!["draw"]);
        assert_eq!(config.image_output_dir, PathBuf::from("/tmp/jimeng"));
        assert_eq!(config.retention_window(), Duration::from_secs(43_200));
        assert_eq!(config.clean_check_interval, 60);
        assert_eq!(config.max_images, 4);
        Ok(())
    }

    #[test]
    fn numeric_strings_are_accepted() -> anyhow::Result<()> {
        let config = PluginConfig::from_value(json!({
            "auth_token": "secret",
            "clean_interval": "1.5",
            "clean_check_interval": "120",
            "max_images": "2",
        }))?;
        assert_eq!(config.clean_interval, 1.5);
        assert_eq!(config.clean_check_interval, 120);
        assert_eq!(config.max_images, 2);
        Ok(())
    }

    #[test]
    fn empty_config_is_rejected() {
        let err = PluginConfig::from_value(json!({})).unwrap_err();
        assert_eq!(err.to_string(), "config not found");
    }

    #[test]
    fn blank_token_is_rejected_without_env_fallback() {
        if non_empty_env(AUTH_TOKEN_ENV).is_some() {
            return;
        }
        let err = PluginConfig::from_value(json!({"auth_token": "  "})).unwrap_err();
        assert_eq!(err.to_string(), "auth token not found in config");
    }

    #[test]
    fn invalid_limits_are_rejected() {
        for payload in [
            json!({"auth_token": "t", "max_images": 0}),
            json!({"auth_token": "t", "clean_check_interval": 0}),
            json!({"auth_token": "t", "clean_interval": -1}),
            json!({"auth_token": "t", "drawing_prefixes": []}),
            json!({"auth_token": "t", "drawing_prefixes": ["ok", ""]}),
            json!({"auth_token": "t", "max_images": "many"}),
        ] {
            assert!(
                PluginConfig::from_value(payload.clone()).is_err(),
                "expected rejection for {payload}"
            );
        }
    }

    #[test]
    fn oversized_clean_interval_is_rejected() -> anyhow::Result<()> {
        let err = PluginConfig::from_value(json!({"auth_token": "t", "clean_interval": 1e20}))
            .unwrap_err();
        assert!(err.to_string().contains("too large"), "{err:#}");

        let ten_years = PluginConfig::from_value(json!({"auth_token": "t", "clean_interval": 3650}))?;
        assert_eq!(ten_years.retention_window(), Duration::from_secs(3650 * 86_400));

        let mut unchecked = ten_years;
        unchecked.clean_interval = 1e20;
        assert_eq!(unchecked.retention_window(), Duration::MAX);
        Ok(())
    }

    #[test]
    fn load_reads_config_file() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("config.json");
        std::fs::write(&path, r#"{"auth_token": "file-token", "max_images": 2}"#)?;
        let config = PluginConfig::load(&path)?;
        assert_eq!(config.auth_token, "file-token");
        assert_eq!(config.max_images, 2);

        let missing = PluginConfig::load(&temp.path().join("missing.json")).unwrap_err();
        assert!(missing.to_string().starts_with("config not found"));
        Ok(())
    }
}
