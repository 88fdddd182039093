use std::path::{Path, PathBuf};

use config::{Config, Environment, File, FileFormat};
use mallbus_error::ConfigError;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

use crate::bus::BrokerConfig;

/// File looked up in the working directory by [`Settings::load`].
pub const DEFAULT_CONFIG_FILE: &str = "mallbus.toml";
/// Prefix of environment overrides, e.g. `MALLBUS_BROKER__QUEUE_CAPACITY`.
pub const ENV_PREFIX: &str = "MALLBUS";

const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    #[default]
    Compact,
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Base level for the crate and its dependencies.
    pub level: String,
    /// Extra `EnvFilter` directives, e.g. `"mallbus::bus=trace"`.
    pub directives: Vec<String>,
    pub format: LogFormat,
    pub console_enabled: bool,
    pub with_ansi: bool,
    pub with_target: bool,
    pub with_thread_ids: bool,
    /// Daily-rolling file output in `log_dir`.
    pub file_enabled: bool,
    pub log_dir: PathBuf,
    pub file_prefix: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directives: Vec::new(),
            format: LogFormat::Compact,
            console_enabled: true,
            with_ansi: true,
            with_target: true,
            with_thread_ids: false,
            file_enabled: false,
            log_dir: PathBuf::from("logs"),
            file_prefix: "mallbus.log".to_string(),
        }
    }
}

impl LoggingSettings {
    /// `EnvFilter` directive built from `level` and `directives`.
    pub fn filter_directive(&self) -> String {
        std::iter::once(self.level.clone())
            .chain(self.directives.iter().cloned())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !LEVELS.contains(&self.level.to_ascii_lowercase().as_str()) {
            return Err(ConfigError::invalid(
                "logging.level",
                format!("unknown level '{}', expected one of {}", self.level, LEVELS.join("|")),
            ));
        }
        if self.file_enabled && self.file_prefix.trim().is_empty() {
            return Err(ConfigError::invalid("logging.file_prefix", "must not be empty"));
        }
        Ok(())
    }
}

/// Complete application settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub broker: BrokerConfig,
    pub logging: LoggingSettings,
}

impl Settings {
    /// Loads defaults, then `mallbus.toml` if present, then the environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Same as [`Settings::load`] with an explicit file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let settings = Self::build(path).map_err(|e| ConfigError::Load {
            reason: e.to_string(),
        })?;
        settings.validate()?;
        Ok(settings)
    }

    fn build(path: &Path) -> Result<Self, config::ConfigError> {
        let defaults = Self::default();
        let cfg = Config::builder()
            .set_default("broker.queue_capacity", defaults.broker.queue_capacity as u64)?
            .set_default("broker.worker_threads", defaults.broker.worker_threads as u64)?
            .set_default(
                "broker.task_queue_capacity",
                defaults.broker.task_queue_capacity as u64,
            )?
            .set_default("logging.level", defaults.logging.level)?
            .add_source(
                File::from(path)
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        cfg.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker.validate().map_err(|e| match e {
            mallbus_error::BrokerError::InvalidConfig { field, reason } => ConfigError::Invalid {
                field: broker_field(field),
                reason,
            },
            other => ConfigError::Load {
                reason: other.to_string(),
            },
        })?;
        self.logging.validate()
    }
}

fn broker_field(field: &'static str) -> &'static str {
    match field {
        "queue_capacity" => "broker.queue_capacity",
        "worker_threads" => "broker.worker_threads",
        "task_queue_capacity" => "broker.task_queue_capacity",
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use std::{env, io::Write};

    use serial_test::serial;
    use tempfile::NamedTempFile;

    use super::*;

    fn clear_env() {
        for (key, _) in env::vars() {
            if key.starts_with("MALLBUS_") {
                env::remove_var(key);
            }
        }
    }

    fn toml_file(body: &str) -> NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    #[test]
    #[serial]
    fn test_defaults_without_file() {
        clear_env();
        let settings = Settings::load_from(Path::new("does-not-exist.toml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.broker.queue_capacity, 1000);
        assert_eq!(settings.logging.format, LogFormat::Compact);
    }

    #[test]
    #[serial]
    fn test_file_overrides_defaults() {
        clear_env();
        let file = toml_file(
            r#"
            [broker]
            queue_capacity = 16
            worker_threads = 2

            [logging]
            level = "debug"
            format = "json"
            directives = ["mallbus::bus=trace"]
            "#,
        );
        let settings = Settings::load_from(file.path()).unwrap();
        assert_eq!(settings.broker.queue_capacity, 16);
        assert_eq!(settings.broker.worker_threads, 2);
        assert_eq!(settings.broker.task_queue_capacity, 1024);
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert_eq!(settings.logging.filter_directive(), "debug,mallbus::bus=trace");
    }

    #[test]
    #[serial]
    fn test_env_overrides_file() {
        clear_env();
        let file = toml_file("[broker]\nqueue_capacity = 16\n");
        env::set_var("MALLBUS_BROKER__QUEUE_CAPACITY", "64");
        env::set_var("MALLBUS_LOGGING__LEVEL", "warn");
        let settings = Settings::load_from(file.path());
        clear_env();

        let settings = settings.unwrap();
        assert_eq!(settings.broker.queue_capacity, 64);
        assert_eq!(settings.logging.level, "warn");
    }

    #[test]
    #[serial]
    fn test_zero_workers_rejected() {
        clear_env();
        let file = toml_file("[broker]\nworker_threads = 0\n");
        let err = Settings::load_from(file.path()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                field: "broker.worker_threads",
                reason: "must be positive".to_string(),
            }
        );
    }

    #[test]
    #[serial]
    fn test_malformed_file_is_load_error() {
        clear_env();
        let file = toml_file("[broker\nqueue_capacity = ");
        let err = Settings::load_from(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Load { .. }));
    }

    #[test]
    fn test_unknown_level_rejected() {
        let logging = LoggingSettings {
            level: "loud".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            logging.validate(),
            Err(ConfigError::Invalid { field: "logging.level", .. })
        ));
    }
}
