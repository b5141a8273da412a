use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::ConfigError;

#[derive(Debug, Deserialize)]
pub struct Config {
    pub autoscribe: AutoscribeConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub site: SiteConfig,
}

#[derive(Debug, Deserialize)]
pub struct AutoscribeConfig {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_tick_interval")]
    pub tick_interval: String,
    /// Recorded as `created_by` on generated articles.
    #[serde(default = "default_author_id")]
    pub author_id: String,
}

fn default_version() -> u32 {
    1
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_timezone() -> String {
    "UTC".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_tick_interval() -> String {
    "60s".to_string()
}
fn default_author_id() -> String {
    "autoscribe".to_string()
}

#[derive(Debug, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "autoscribe.db".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_generation_timeout")]
    pub timeout: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            endpoint: default_generation_endpoint(),
            api_key: None,
            model: default_model(),
            timeout: default_generation_timeout(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_generation_endpoint() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_generation_timeout() -> String {
    "2m".to_string()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagesConfig {
    #[serde(default = "default_images_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub access_key: Option<String>,
    #[serde(default = "default_inline_image_count")]
    pub inline_image_count: usize,
}

impl Default for ImagesConfig {
    fn default() -> Self {
        Self {
            endpoint: default_images_endpoint(),
            access_key: None,
            inline_image_count: default_inline_image_count(),
        }
    }
}

fn default_images_endpoint() -> String {
    "https://api.unsplash.com".to_string()
}
fn default_inline_image_count() -> usize {
    2
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SiteConfig {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: String::new(),
            base_url: default_base_url(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:3000".to_string()
}

impl Config {
    /// Resolve the database path (relative to data_dir if not absolute).
    pub fn db_path(&self) -> PathBuf {
        let db_path = Path::new(&self.database.path);
        if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            self.autoscribe.data_dir.join(db_path)
        }
    }

    pub fn generation_timeout(&self) -> Duration {
        humantime::parse_duration(&self.generation.timeout).unwrap_or(Duration::from_secs(120))
    }

    pub fn tick_interval(&self) -> Duration {
        humantime::parse_duration(&self.autoscribe.tick_interval).unwrap_or(Duration::from_secs(60))
    }

    pub fn timezone(&self) -> chrono_tz::Tz {
        self.autoscribe.timezone.parse().unwrap_or(chrono_tz::UTC)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(ConfigError::ReadFile)
        .context("reading config file")?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).map_err(ConfigError::Parse)?;
    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    if config.autoscribe.version != 1 {
        return Err(ConfigError::Validation(format!(
            "unsupported config version {} (this binary supports version 1)",
            config.autoscribe.version
        ))
        .into());
    }

    config
        .autoscribe
        .timezone
        .parse::<chrono_tz::Tz>()
        .map_err(|_| ConfigError::Validation(format!("unknown timezone '{}'", config.autoscribe.timezone)))?;

    let tick = humantime::parse_duration(&config.autoscribe.tick_interval).map_err(|e| {
        ConfigError::Validation(format!("tick_interval '{}': {}", config.autoscribe.tick_interval, e))
    })?;
    if tick < Duration::from_secs(1) {
        return Err(ConfigError::Validation("tick_interval must be at least 1s".to_string()).into());
    }

    let timeout = humantime::parse_duration(&config.generation.timeout)
        .map_err(|e| ConfigError::Validation(format!("generation timeout '{}': {}", config.generation.timeout, e)))?;
    if timeout.is_zero() {
        return Err(ConfigError::Validation("generation timeout must be non-zero".to_string()).into());
    }

    for (name, url) in [
        ("generation.endpoint", Some(&config.generation.endpoint)),
        ("images.endpoint", Some(&config.images.endpoint)),
        ("whatsapp.endpoint", config.whatsapp.endpoint.as_ref()),
        ("site.base_url", Some(&config.site.base_url)),
    ] {
        if let Some(url) = url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(ConfigError::Validation(format!("{name} '{url}' must be an http(s) URL")).into());
        }
    }

    if !(0.0..=2.0).contains(&config.generation.temperature) {
        return Err(ConfigError::Validation(format!(
            "generation temperature {} out of range 0.0-2.0",
            config.generation.temperature
        ))
        .into());
    }

    if config.autoscribe.author_id.trim().is_empty() {
        return Err(ConfigError::Validation("author_id must not be empty".to_string()).into());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = "[autoscribe]\n";

    #[test]
    fn minimal_config_gets_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        validate_config(&config).unwrap();
        assert_eq!(config.db_path(), PathBuf::from("./data/autoscribe.db"));
        assert_eq!(config.generation_timeout(), Duration::from_secs(120));
        assert_eq!(config.tick_interval(), Duration::from_secs(60));
        assert_eq!(config.images.inline_image_count, 2);
        assert!(config.whatsapp.endpoint.is_none());
    }

    #[test]
    fn rejects_unknown_timezone() {
        let config = parse_config("[autoscribe]\ntimezone = \"Mars/Olympus\"\n").unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown timezone"));
    }

    #[test]
    fn rejects_bad_generation_timeout() {
        let config = parse_config("[autoscribe]\n[generation]\ntimeout = \"soon\"\n").unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let config = parse_config("[autoscribe]\n[whatsapp]\nendpoint = \"ftp://gateway\"\n").unwrap();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("whatsapp.endpoint"));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[autoscribe]\ntimezone = \"Asia/Riyadh\"\n[site]\nname = \"Demo\"\n[database]\npath = \"/tmp/x.db\"\n",
        )
        .unwrap();
        let config = load_config(&path).unwrap();
        validate_config(&config).unwrap();
        assert_eq!(config.timezone(), chrono_tz::Asia::Riyadh);
        assert_eq!(config.site.name, "Demo");
        assert_eq!(config.db_path(), PathBuf::from("/tmp/x.db"));
    }
}
