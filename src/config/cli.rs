use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the Shutterbug binary.
#[derive(Debug, Parser)]
#[command(
    name = "shutterbug",
    version,
    about = "Headless browser screenshot and PDF service"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SHUTTERBUG_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the render HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,

    /// Override the number of browser instances kept warm.
    #[arg(long = "pool-min", value_name = "COUNT")]
    pub pool_min: Option<usize>,

    /// Override the maximum number of concurrent browser instances.
    #[arg(long = "pool-max", value_name = "COUNT")]
    pub pool_max: Option<usize>,

    /// Override the viewport width used when a request omits one.
    #[arg(long = "render-default-width", value_name = "PIXELS")]
    pub render_default_width: Option<u32>,

    /// Override the viewport height used when a request omits one.
    #[arg(long = "render-default-height", value_name = "PIXELS")]
    pub render_default_height: Option<u32>,

    /// Override the output format used when a request omits one.
    #[arg(long = "render-default-format", value_name = "FORMAT")]
    pub render_default_format: Option<String>,

    /// Override the deadline applied to each render stage.
    #[arg(long = "render-stage-timeout-seconds", value_name = "SECONDS")]
    pub render_stage_timeout_seconds: Option<u64>,

    /// Override the Chrome/Chromium executable path.
    #[arg(long = "engine-chrome-path", value_name = "PATH")]
    pub engine_chrome_path: Option<PathBuf>,

    /// Toggle the browser sandbox.
    #[arg(
        long = "engine-sandbox",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub engine_sandbox: Option<bool>,

    /// Override the root directory for temporary render artifacts.
    #[arg(long = "artifacts-directory", value_name = "PATH")]
    pub artifacts_directory: Option<PathBuf>,
}
