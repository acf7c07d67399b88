use crate::api::DEFAULT_BASE_URL;
use crate::cache::{DEFAULT_CACHE_DURATION_SECS, MAX_CACHE_DURATION_SECS};
use crate::error::{PortalError, Result};
use crate::retry::{RetryPolicy, DEFAULT_DELAY_MS, DEFAULT_MAX_RETRIES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR: &str = ".portal";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_DEVICE_NAME: &str = "mobile_app";
const MAX_RETRIES_LIMIT: u32 = 20;

/// A validation error in the configuration
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]: {}", self.field, self.message)
    }
}

/// Backend connection settings
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ApiConfig {
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub device_name: Option<String>,
}

impl ApiConfig {
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS))
    }

    pub fn device_name(&self) -> &str {
        self.device_name.as_deref().unwrap_or(DEFAULT_DEVICE_NAME)
    }
}

/// Virtual account polling
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub delay_ms: Option<u64>,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
            Duration::from_millis(self.delay_ms.unwrap_or(DEFAULT_DELAY_MS)),
        )
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct CacheConfig {
    #[serde(default)]
    pub duration_secs: Option<u64>,
}

impl CacheConfig {
    pub fn duration_secs(&self) -> u64 {
        self.duration_secs.unwrap_or(DEFAULT_CACHE_DURATION_SECS)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct StorageConfig {
    /// Key-value file; defaults to ~/.portal/storage.json
    #[serde(default)]
    pub path: Option<PathBuf>,
}

/// Payment journal (JSONL)
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct JournalConfig {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl JournalConfig {
    pub fn enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    /// Journal directory; defaults to ~/.portal/journal
    pub fn dir(&self) -> Option<PathBuf> {
        self.dir
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(CONFIG_DIR).join("journal")))
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub journal: JournalConfig,
}

impl Config {
    /// Load configuration from default paths
    /// Priority: local (.portal/config.local.toml) > project (.portal/config.toml) > user (~/.portal/config.toml)
    pub fn load() -> Result<Self> {
        let home = dirs::home_dir();
        Self::load_layers(home.as_deref(), Path::new("."))
    }

    /// Layered load rooted at explicit home and project directories
    pub fn load_layers(home: Option<&Path>, project: &Path) -> Result<Self> {
        let mut config = Self::default();

        if let Some(home) = home {
            let user_config = home.join(CONFIG_DIR).join("config.toml");
            if user_config.exists() {
                config.merge(Self::load_from(&user_config)?);
            }
        }

        // Project-level overrides user-level
        let project_config = project.join(CONFIG_DIR).join("config.toml");
        if project_config.exists() {
            config.merge(Self::load_from(&project_config)?);
        }

        // Local overrides project-level, should be gitignored
        let local_config = project.join(CONFIG_DIR).join("config.local.toml");
        if local_config.exists() {
            config.merge(Self::load_from(&local_config)?);
        }

        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PortalError::Config(format!("{}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| PortalError::Config(format!("{}: {}", path.display(), e)))
    }

    /// Merge another config into this one; values set in `other` win
    pub fn merge(&mut self, other: Config) {
        fn take<T>(slot: &mut Option<T>, value: Option<T>) {
            if value.is_some() {
                *slot = value;
            }
        }

        take(&mut self.api.base_url, other.api.base_url);
        take(&mut self.api.timeout_ms, other.api.timeout_ms);
        take(&mut self.api.device_name, other.api.device_name);

        take(&mut self.retry.max_retries, other.retry.max_retries);
        take(&mut self.retry.delay_ms, other.retry.delay_ms);

        take(&mut self.cache.duration_secs, other.cache.duration_secs);

        take(&mut self.storage.path, other.storage.path);

        take(&mut self.journal.enabled, other.journal.enabled);
        take(&mut self.journal.dir, other.journal.dir);
    }

    /// Validate configuration and return any errors found
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        let base_url = self.api.base_url();
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            errors.push(ValidationError {
                field: "api.base_url".to_string(),
                message: format!("Expected an http(s) URL, got '{}'", base_url),
            });
        }

        if self.api.timeout_ms == Some(0) {
            errors.push(ValidationError {
                field: "api.timeout_ms".to_string(),
                message: "Must be greater than 0".to_string(),
            });
        }

        if self.api.device_name().trim().is_empty() {
            errors.push(ValidationError {
                field: "api.device_name".to_string(),
                message: "Must not be empty".to_string(),
            });
        }

        if let Some(retries) = self.retry.max_retries {
            if retries > MAX_RETRIES_LIMIT {
                errors.push(ValidationError {
                    field: "retry.max_retries".to_string(),
                    message: format!("Must be at most {}, got {}", MAX_RETRIES_LIMIT, retries),
                });
            }
        }

        match self.cache.duration_secs {
            Some(0) => errors.push(ValidationError {
                field: "cache.duration_secs".to_string(),
                message: "Must be greater than 0".to_string(),
            }),
            Some(secs) if secs > MAX_CACHE_DURATION_SECS => errors.push(ValidationError {
                field: "cache.duration_secs".to_string(),
                message: format!("Must be at most {}, got {}", MAX_CACHE_DURATION_SECS, secs),
            }),
            _ => {}
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.api.base_url(), "https://portal.relabs.id");
        assert_eq!(config.api.timeout(), Duration::from_secs(30));
        assert_eq!(config.api.device_name(), "mobile_app");
        assert_eq!(config.retry.policy(), RetryPolicy::default());
        assert_eq!(config.cache.duration_secs(), 300);
        assert!(config.journal.enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[api]
base_url = "https://staging.portal.test"
timeout_ms = 5000

[retry]
max_retries = 3
delay_ms = 1500

[journal]
enabled = false
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api.base_url(), "https://staging.portal.test");
        assert_eq!(config.api.timeout(), Duration::from_secs(5));
        assert_eq!(
            config.retry.policy(),
            RetryPolicy::new(3, Duration::from_millis(1500))
        );
        assert!(!config.journal.enabled());
        // Unset sections keep their defaults
        assert_eq!(config.cache.duration_secs(), 300);
    }

    #[test]
    fn test_load_from_invalid_toml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[api\nbase_url = ").unwrap();

        let err = Config::load_from(&path).unwrap_err();
        assert!(matches!(err, PortalError::Config(_)));
        assert!(err.to_string().contains("config.toml"));
    }

    #[test]
    fn test_merge_overrides_only_set_values() {
        let mut base: Config = toml::from_str(
            r#"
[api]
base_url = "https://user.portal.test"
device_name = "laptop"

[retry]
max_retries = 8
"#,
        )
        .unwrap();
        let local: Config = toml::from_str(
            r#"
[api]
base_url = "http://localhost:8000"

[cache]
duration_secs = 60
"#,
        )
        .unwrap();

        base.merge(local);
        assert_eq!(base.api.base_url(), "http://localhost:8000");
        assert_eq!(base.api.device_name(), "laptop");
        assert_eq!(base.retry.policy().max_retries, 8);
        assert_eq!(base.cache.duration_secs(), 60);
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = Config::default();
        config.api.base_url = Some("portal.relabs.id".to_string());
        config.api.timeout_ms = Some(0);
        config.retry.max_retries = Some(50);
        config.cache.duration_secs = Some(0);

        let errors = config.validate().unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            [
                "api.base_url",
                "api.timeout_ms",
                "retry.max_retries",
                "cache.duration_secs"
            ]
        );
        assert!(errors[2].message.contains("at most 20"));
        assert_eq!(errors[1].to_string(), "[api.timeout_ms]: Must be greater than 0");
    }

    fn write_layer(dir: &Path, name: &str, content: &str) {
        let dir = dir.join(".portal");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn test_layer_precedence() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();

        write_layer(
            home.path(),
            "config.toml",
            "[api]\nbase_url = \"https://user.portal.test\"\ndevice_name = \"laptop\"\n\n[retry]\nmax_retries = 7\ndelay_ms = 100\n",
        );
        write_layer(
            project.path(),
            "config.toml",
            "[api]\nbase_url = \"https://project.portal.test\"\n\n[retry]\nmax_retries = 4\n",
        );
        write_layer(
            project.path(),
            "config.local.toml",
            "[retry]\nmax_retries = 2\n",
        );

        let config = Config::load_layers(Some(home.path()), project.path()).unwrap();
        assert_eq!(config.api.base_url(), "https://project.portal.test");
        assert_eq!(config.api.device_name(), "laptop");
        assert_eq!(
            config.retry.policy(),
            RetryPolicy::new(2, Duration::from_millis(100))
        );
    }

    #[test]
    fn test_layers_optional() {
        let project = TempDir::new().unwrap();
        let config = Config::load_layers(None, project.path()).unwrap();
        assert_eq!(config.api.base_url(), DEFAULT_BASE_URL);

        write_layer(project.path(), "config.local.toml", "[cache]\nduration_secs = 90\n");
        let config = Config::load_layers(None, project.path()).unwrap();
        assert_eq!(config.cache.duration_secs(), 90);
    }

    #[test]
    fn test_broken_layer_is_reported() {
        let home = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        write_layer(home.path(), "config.toml", "[retry\n");

        let err = Config::load_layers(Some(home.path()), project.path()).unwrap_err();
        assert!(matches!(err, PortalError::Config(_)));
    }

    #[test]
    fn test_validate_cache_upper_bound() {
        let mut config = Config::default();
        config.cache.duration_secs = Some(86_400);
        assert!(config.validate().is_ok());

        config.cache.duration_secs = Some(9_223_372_036_854_775_807);
        let errors = config.validate().unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "cache.duration_secs");
        assert!(errors[0].message.contains("at most 86400"));
    }
}
