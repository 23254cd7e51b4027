//! Configuration layer: typed settings with layered precedence (file → env → CLI).

mod cli;

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::{
    application::{pool::PoolConfig, render::RenderPipelineConfig},
    domain::{
        format::RenderFormat,
        geometry::{MAX_DIMENSION, Viewport},
        request::RenderDefaults,
    },
};

pub use cli::{CliArgs, Command, ServeArgs, ServeOverrides};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "shutterbug";
const ENV_PREFIX: &str = "SHUTTERBUG";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_POOL_MIN: usize = 1;
const DEFAULT_POOL_MAX: usize = 4;
const DEFAULT_POOL_IDLE_TIMEOUT_SECS: u64 = 300;
const DEFAULT_POOL_MAINTENANCE_INTERVAL_SECS: u64 = 30;
const DEFAULT_RENDER_WIDTH: u32 = 1280;
const DEFAULT_RENDER_HEIGHT: u32 = 720;
const DEFAULT_RENDER_FORMAT: RenderFormat = RenderFormat::Png;
const DEFAULT_STAGE_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ENGINE_LAUNCH_TIMEOUT_SECS: u64 = 30;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub pool: PoolSettings,
    pub render: RenderSettings,
    pub engine: EngineSettings,
    pub artifacts: ArtifactSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub min: usize,
    pub max: usize,
    pub idle_timeout: Duration,
    pub maintenance_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct RenderSettings {
    pub default_viewport: Viewport,
    pub default_format: RenderFormat,
    pub stage_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Browser executable; auto-detected when absent.
    pub chrome_path: Option<PathBuf>,
    pub sandbox: bool,
    pub launch_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ArtifactSettings {
    /// Root for the private artifact directory; the system temp dir when absent.
    pub directory: Option<PathBuf>,
}

impl From<&PoolSettings> for PoolConfig {
    fn from(settings: &PoolSettings) -> Self {
        Self {
            min: settings.min,
            max: settings.max,
            idle_timeout: settings.idle_timeout,
        }
    }
}

impl From<&RenderSettings> for RenderPipelineConfig {
    fn from(settings: &RenderSettings) -> Self {
        Self {
            defaults: RenderDefaults {
                viewport: settings.default_viewport,
                format: settings.default_format,
            },
            stage_timeout: settings.stage_timeout,
        }
    }
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
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    pool: RawPoolSettings,
    render: RawRenderSettings,
    engine: RawEngineSettings,
    artifacts: RawArtifactSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(min) = overrides.pool_min {
            self.pool.min = Some(min);
        }
        if let Some(max) = overrides.pool_max {
            self.pool.max = Some(max);
        }
        if let Some(width) = overrides.render_default_width {
            self.render.default_width = Some(width);
        }
        if let Some(height) = overrides.render_default_height {
            self.render.default_height = Some(height);
        }
        if let Some(format) = overrides.render_default_format.as_ref() {
            self.render.default_format = Some(format.clone());
        }
        if let Some(seconds) = overrides.render_stage_timeout_seconds {
            self.render.stage_timeout_seconds = Some(seconds);
        }
        if let Some(path) = overrides.engine_chrome_path.as_ref() {
            self.engine.chrome_path = Some(path.clone());
        }
        if let Some(sandbox) = overrides.engine_sandbox {
            self.engine.sandbox = Some(sandbox);
        }
        if let Some(directory) = overrides.artifacts_directory.as_ref() {
            self.artifacts.directory = Some(directory.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            pool,
            render,
            engine,
            artifacts,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            pool: build_pool_settings(pool)?,
            render: build_render_settings(render)?,
            engine: build_engine_settings(engine)?,
            artifacts: build_artifact_settings(artifacts),
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_shutdown = positive_seconds(
        server.graceful_shutdown_seconds,
        DEFAULT_GRACEFUL_SHUTDOWN_SECS,
        "server.graceful_shutdown_seconds",
    )?;

    Ok(ServerSettings {
        addr,
        graceful_shutdown,
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

fn build_pool_settings(pool: RawPoolSettings) -> Result<PoolSettings, LoadError> {
    let min = pool.min.unwrap_or(DEFAULT_POOL_MIN);
    let max = pool.max.unwrap_or(DEFAULT_POOL_MAX);
    if max == 0 {
        return Err(LoadError::invalid("pool.max", "must be greater than zero"));
    }
    if min > max {
        return Err(LoadError::invalid(
            "pool.min",
            format!("must not exceed pool.max ({max})"),
        ));
    }

    Ok(PoolSettings {
        min,
        max,
        idle_timeout: positive_seconds(
            pool.idle_timeout_seconds,
            DEFAULT_POOL_IDLE_TIMEOUT_SECS,
            "pool.idle_timeout_seconds",
        )?,
        maintenance_interval: positive_seconds(
            pool.maintenance_interval_seconds,
            DEFAULT_POOL_MAINTENANCE_INTERVAL_SECS,
            "pool.maintenance_interval_seconds",
        )?,
    })
}

fn build_render_settings(render: RawRenderSettings) -> Result<RenderSettings, LoadError> {
    let width = dimension(render.default_width, DEFAULT_RENDER_WIDTH, "render.default_width")?;
    let height = dimension(
        render.default_height,
        DEFAULT_RENDER_HEIGHT,
        "render.default_height",
    )?;

    let default_format = match render.default_format {
        Some(value) => RenderFormat::from_str(value.trim())
            .map_err(|err| LoadError::invalid("render.default_format", err.to_string()))?,
        None => DEFAULT_RENDER_FORMAT,
    };

    Ok(RenderSettings {
        default_viewport: Viewport { width, height },
        default_format,
        stage_timeout: positive_seconds(
            render.stage_timeout_seconds,
            DEFAULT_STAGE_TIMEOUT_SECS,
            "render.stage_timeout_seconds",
        )?,
    })
}

fn build_engine_settings(engine: RawEngineSettings) -> Result<EngineSettings, LoadError> {
    let chrome_path = engine.chrome_path.filter(|path| !path.as_os_str().is_empty());

    Ok(EngineSettings {
        chrome_path,
        sandbox: engine.sandbox.unwrap_or(true),
        launch_timeout: positive_seconds(
            engine.launch_timeout_seconds,
            DEFAULT_ENGINE_LAUNCH_TIMEOUT_SECS,
            "engine.launch_timeout_seconds",
        )?,
    })
}

fn build_artifact_settings(artifacts: RawArtifactSettings) -> ArtifactSettings {
    ArtifactSettings {
        directory: artifacts
            .directory
            .filter(|path| !path.as_os_str().is_empty()),
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawPoolSettings {
    min: Option<usize>,
    max: Option<usize>,
    idle_timeout_seconds: Option<u64>,
    maintenance_interval_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRenderSettings {
    default_width: Option<u32>,
    default_height: Option<u32>,
    default_format: Option<String>,
    stage_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawEngineSettings {
    chrome_path: Option<PathBuf>,
    sandbox: Option<bool>,
    launch_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawArtifactSettings {
    directory: Option<PathBuf>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn positive_seconds(
    value: Option<u64>,
    default: u64,
    key: &'static str,
) -> Result<Duration, LoadError> {
    let seconds = value.unwrap_or(default);
    if seconds == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(seconds))
}

fn dimension(value: Option<u32>, default: u32, key: &'static str) -> Result<u32, LoadError> {
    let value = value.unwrap_or(default);
    if value == 0 || value > MAX_DIMENSION {
        return Err(LoadError::invalid(
            key,
            format!("must be between 1 and {MAX_DIMENSION}"),
        ));
    }
    Ok(value)
}
