use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cascade::escalation::DisabledConfigPolicy;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub cascade: CascadeSettings,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

/// Engine settings owned by the deployment. The queue and per-step SLA live
/// in the administrator-owned `CascadeConfig` row instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CascadeSettings {
    pub sweep_interval_secs: u64,
    pub sweep_batch_size: u32,
    pub warning_pct: u32,
    pub critical_pct: u32,
    pub on_config_disabled: DisabledConfigPolicy,
}

impl Default for CascadeSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            sweep_batch_size: 200,
            warning_pct: 75,
            critical_pct: 90,
            on_config_disabled: DisabledConfigPolicy::Continue,
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub server_port: Option<u16>,
    pub sweep_interval_secs: Option<u64>,
    pub on_config_disabled: Option<DisabledConfigPolicy>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://leadrelay.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            cascade: CascadeSettings::default(),
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leadrelay.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(cascade) = patch.cascade {
            if let Some(sweep_interval_secs) = cascade.sweep_interval_secs {
                self.cascade.sweep_interval_secs = sweep_interval_secs;
            }
            if let Some(sweep_batch_size) = cascade.sweep_batch_size {
                self.cascade.sweep_batch_size = sweep_batch_size;
            }
            if let Some(warning_pct) = cascade.warning_pct {
                self.cascade.warning_pct = warning_pct;
            }
            if let Some(critical_pct) = cascade.critical_pct {
                self.cascade.critical_pct = critical_pct;
            }
            if let Some(on_config_disabled) = cascade.on_config_disabled {
                self.cascade.on_config_disabled = on_config_disabled;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEADRELAY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LEADRELAY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LEADRELAY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEADRELAY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LEADRELAY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADRELAY_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEADRELAY_SERVER_PORT") {
            self.server.port = parse_u16("LEADRELAY_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LEADRELAY_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("LEADRELAY_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADRELAY_CASCADE_SWEEP_INTERVAL_SECS") {
            self.cascade.sweep_interval_secs =
                parse_u64("LEADRELAY_CASCADE_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADRELAY_CASCADE_SWEEP_BATCH_SIZE") {
            self.cascade.sweep_batch_size =
                parse_u32("LEADRELAY_CASCADE_SWEEP_BATCH_SIZE", &value)?;
        }
        if let Some(value) = read_env("LEADRELAY_CASCADE_WARNING_PCT") {
            self.cascade.warning_pct = parse_u32("LEADRELAY_CASCADE_WARNING_PCT", &value)?;
        }
        if let Some(value) = read_env("LEADRELAY_CASCADE_CRITICAL_PCT") {
            self.cascade.critical_pct = parse_u32("LEADRELAY_CASCADE_CRITICAL_PCT", &value)?;
        }
        if let Some(value) = read_env("LEADRELAY_CASCADE_ON_CONFIG_DISABLED") {
            self.cascade.on_config_disabled = value.parse().map_err(|_| {
                ConfigError::InvalidEnvOverride {
                    key: "LEADRELAY_CASCADE_ON_CONFIG_DISABLED".to_string(),
                    value: value.clone(),
                }
            })?;
        }

        let log_level =
            read_env("LEADRELAY_LOGGING_LEVEL").or_else(|| read_env("LEADRELAY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADRELAY_LOGGING_FORMAT").or_else(|| read_env("LEADRELAY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(sweep_interval_secs) = overrides.sweep_interval_secs {
            self.cascade.sweep_interval_secs = sweep_interval_secs;
        }
        if let Some(on_config_disabled) = overrides.on_config_disabled {
            self.cascade.on_config_disabled = on_config_disabled;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_cascade(&self.cascade)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leadrelay.toml"), PathBuf::from("config/leadrelay.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address must not be empty".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_cascade(cascade: &CascadeSettings) -> Result<(), ConfigError> {
    if cascade.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "cascade.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }

    if cascade.sweep_batch_size == 0 {
        return Err(ConfigError::Validation(
            "cascade.sweep_batch_size must be greater than zero".to_string(),
        ));
    }

    let ordered = cascade.warning_pct > 0
        && cascade.warning_pct < cascade.critical_pct
        && cascade.critical_pct < 100;
    if !ordered {
        return Err(ConfigError::Validation(format!(
            "cascade thresholds must satisfy 0 < warning_pct ({}) < critical_pct ({}) < 100",
            cascade.warning_pct, cascade.critical_pct
        )));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    cascade: Option<CascadePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CascadePatch {
    sweep_interval_secs: Option<u64>,
    sweep_batch_size: Option<u32>,
    warning_pct: Option<u32>,
    critical_pct: Option<u32>,
    on_config_disabled: Option<DisabledConfigPolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};
    use crate::cascade::escalation::DisabledConfigPolicy;

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid() -> Result<(), String> {
        let config = AppConfig::default();
        config.validate().map_err(|err| err.to_string())?;
        ensure(config.cascade.sweep_interval_secs == 60, "default sweep interval is one minute")?;
        ensure(
            config.cascade.on_config_disabled == DisabledConfigPolicy::Continue,
            "disabled configs keep running by default",
        )
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_LEADRELAY_DB_PATH", "/var/lib/leadrelay/ledger.db");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("leadrelay.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://${TEST_LEADRELAY_DB_PATH}"

[cascade]
on_config_disabled = "freeze"
sweep_interval_secs = 30
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite:///var/lib/leadrelay/ledger.db",
                "database url should be interpolated from environment",
            )?;
            ensure(
                config.cascade.on_config_disabled == DisabledConfigPolicy::Freeze,
                "freeze policy should be read from file",
            )?;
            ensure(config.cascade.sweep_interval_secs == 30, "sweep interval should be read from file")
        })();

        clear_vars(&["TEST_LEADRELAY_DB_PATH"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADRELAY_LOG_LEVEL", "warn");
        env::set_var("LEADRELAY_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&["LEADRELAY_LOG_LEVEL", "LEADRELAY_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADRELAY_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("LEADRELAY_CASCADE_WARNING_PCT", "60");
        env::set_var("LEADRELAY_CASCADE_ON_CONFIG_DISABLED", "freeze");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("leadrelay.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[cascade]
warning_pct = 70
critical_pct = 95

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    on_config_disabled: Some(DisabledConfigPolicy::Continue),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.cascade.warning_pct == 60, "env warning pct should win over file")?;
            ensure(config.cascade.critical_pct == 95, "file critical pct should win over defaults")?;
            ensure(
                config.cascade.on_config_disabled == DisabledConfigPolicy::Continue,
                "override policy should win over env",
            )
        })();

        clear_vars(&[
            "LEADRELAY_DATABASE_URL",
            "LEADRELAY_CASCADE_WARNING_PCT",
            "LEADRELAY_CASCADE_ON_CONFIG_DISABLED",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADRELAY_CASCADE_WARNING_PCT", "95");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("warning_pct")
            );
            ensure(has_message, "validation failure should mention warning_pct")
        })();

        clear_vars(&["LEADRELAY_CASCADE_WARNING_PCT"]);
        result
    }

    #[test]
    fn invalid_policy_env_override_is_rejected() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADRELAY_CASCADE_ON_CONFIG_DISABLED", "pause");

        let result = (|| -> Result<(), String> {
            let error = AppConfig::load(LoadOptions::default()).err();
            ensure(
                matches!(error, Some(ConfigError::InvalidEnvOverride { ref key, .. }) if key == "LEADRELAY_CASCADE_ON_CONFIG_DISABLED"),
                "unknown policy should be reported as an invalid env override",
            )
        })();

        clear_vars(&["LEADRELAY_CASCADE_ON_CONFIG_DISABLED"]);
        result
    }

    #[test]
    fn zero_sweep_interval_is_rejected() {
        let mut config = AppConfig::default();
        config.cascade.sweep_interval_secs = 0;

        let error = config.validate().err();

        assert!(matches!(
            error,
            Some(ConfigError::Validation(ref message)) if message.contains("sweep_interval_secs")
        ));
    }
}
