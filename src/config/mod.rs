//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use http::HeaderName;
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

const LOCAL_CONFIG_BASENAME: &str = "transfer-cache";
const ENV_PREFIX: &str = "TRANSFER_CACHE";

/// Command-line arguments for the transfer-cache binary.
#[derive(Debug, Parser)]
#[command(
    name = "transfer-cache",
    version,
    about = "Inspect, purge and record transfer-cache handoff payloads"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "TRANSFER_CACHE_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Summarize a handoff payload as JSON.
    Inspect(InspectArgs),
    /// Erase the transfer state from a handoff payload.
    Purge(PurgeArgs),
    /// Run a producer pass over GET URLs and write the resulting payload.
    Record(RecordArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Toggle production mode; replay is disabled when false.
    #[arg(
        long = "production-mode",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub production_mode: Option<bool>,

    /// Header whose value replaces the URL host in request fingerprints.
    #[arg(long = "override-header", value_name = "HEADER", global = true)]
    pub override_header: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct InspectArgs {
    /// Payload file to read.
    #[arg(value_name = "PAYLOAD", value_hint = ValueHint::FilePath)]
    pub payload: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct PurgeArgs {
    /// Payload file to read.
    #[arg(value_name = "PAYLOAD", value_hint = ValueHint::FilePath)]
    pub payload: PathBuf,

    /// Where to write the purged payload; defaults to rewriting PAYLOAD.
    #[arg(long, short, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Args, Clone)]
pub struct RecordArgs {
    /// URLs to request, in dispatch order.
    #[arg(value_name = "URL", required = true)]
    pub urls: Vec<String>,

    /// Where to write the payload.
    #[arg(long, short, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheSettings {
    pub production_mode: bool,
    pub override_header: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder =
        Config::builder().add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    cache: RawCacheSettings,
    logging: RawLoggingSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = &overrides.log_level {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(production_mode) = overrides.production_mode {
            self.cache.production_mode = Some(production_mode);
        }
        if let Some(header) = &overrides.override_header {
            self.cache.override_header = Some(header.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        Ok(Self {
            cache: build_cache_settings(raw.cache)?,
            logging: build_logging_settings(raw.logging)?,
        })
    }
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let override_header = cache.override_header.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    if let Some(header) = &override_header {
        HeaderName::from_str(header).map_err(|err| {
            LoadError::invalid("cache.override_header", format!("`{header}`: {err}"))
        })?;
    }

    Ok(CacheSettings {
        production_mode: cache.production_mode.unwrap_or(true),
        override_header,
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    production_mode: Option<bool>,
    override_header: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
