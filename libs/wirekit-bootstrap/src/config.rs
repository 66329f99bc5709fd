use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Main application configuration: strongly-typed sections for the server,
/// the component scan, and event delivery, plus the logging section map.
/// Read once at startup; there is no hot reload.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Core server configuration.
    pub server: ServerConfig,
    /// Component discovery configuration.
    #[serde(default)]
    pub scan: ScanConfig,
    /// Event bus configuration.
    #[serde(default)]
    pub events: EventsConfig,
    /// Logging configuration (optional, uses defaults if None).
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub timeout_sec: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            timeout_sec: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ScanConfig {
    /// Module-path prefix limiting discovery; empty scans everything linked.
    #[serde(default)]
    pub root: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct EventsConfig {
    /// Worker threads for async event delivery.
    pub workers: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { workers: 8 }
    }
}

/// Logging configuration - maps subsystem names to their logging settings.
/// Key "default" is the catch-all for logs that don't match explicit
/// subsystems.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Section {
    pub console_level: String, // "info", "debug", "error", "off"
    #[serde(default)]
    pub file: String, // "logs/agentry.log"; empty disables the file sink
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>, // How many rotated files to keep
    #[serde(default)]
    pub max_size_mb: Option<u64>, // Max size of the file in MB
}

/// Create a default logging configuration.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: String::new(),
            file_level: "debug".to_string(),
            max_age_days: Some(7),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            scan: ScanConfig::default(),
            events: EventsConfig::default(),
            logging: Some(default_logging_config()),
        }
    }
}

/// CLI arguments that flow into the config merge logic.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub port: Option<u16>,
    pub print_config: bool,
    pub verbose: u8,
}

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file →
    /// environment variables (`APP__SERVER__PORT=8080` maps to
    /// `server.port`).
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        // Start from a minimal base where optional sections are None, so they
        // stay None unless YAML/ENV provides them.
        let base = AppConfig {
            server: ServerConfig::default(),
            scan: ScanConfig::default(),
            events: EventsConfig::default(),
            logging: None,
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(config_path.as_ref()))
            .merge(Env::prefixed("APP__").split("__"));

        let config: AppConfig = figment
            .extract()
            .with_context(|| "Failed to extract config from figment".to_string())?;

        Ok(config)
    }

    /// Load from the given path, or fall back to pure defaults when no path
    /// is provided.
    pub fn load_or_default(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path)
                .with_context(|| format!("Failed to load config from {}", path.display())),
            None => Ok(Self::default()),
        }
    }

    /// Apply CLI overrides on top of the loaded configuration.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.port = port;
        }

        if args.verbose > 0 {
            let level = match args.verbose {
                1 => "info",
                2 => "debug",
                _ => "trace",
            };
            let logging = self.logging.get_or_insert_with(default_logging_config);
            logging
                .entry("default".to_string())
                .and_modify(|section| section.console_level = level.to_string())
                .or_insert_with(|| Section {
                    console_level: level.to_string(),
                    file: String::new(),
                    file_level: String::new(),
                    max_age_days: None,
                    max_backups: None,
                    max_size_mb: None,
                });
        }
    }

    /// Serialize the effective configuration back to YAML (`--print-config`).
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }
}
