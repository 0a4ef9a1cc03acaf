use crate::error::{ApiError, ErrorCode, TapResult};
use crate::stream::{
    DEFAULT_LINE_BUFFER_SIZE, DEFAULT_STREAM_BUFFER_SIZE, StreamBufferOptions, StreamMask,
};
use clap::{Parser, ValueEnum};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "mudtap.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum LineEnding {
    #[default]
    Crlf,
    Cr,
    Lf,
}

impl LineEnding {
    pub fn as_bytes(self) -> &'static [u8] {
        match self {
            LineEnding::Crlf => b"\r\n",
            LineEnding::Cr => b"\r",
            LineEnding::Lf => b"\n",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub game: GameConfig,
    pub buffer: BufferConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub host: String,
    pub port: u16,
    pub connect_timeout_ms: u64,
    pub line_ending: LineEnding,
    pub term: String,
    pub cols: u16,
    pub rows: u16,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4000,
            connect_timeout_ms: 10_000,
            line_ending: LineEnding::Crlf,
            term: "mudtap".to_string(),
            cols: 120,
            rows: 40,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub stream_max_size: usize,
    pub line_max_size: usize,
    pub poll_interval_ms: u64,
    pub reap_interval_ms: u64,
    pub default_mask: StreamMask,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            stream_max_size: DEFAULT_STREAM_BUFFER_SIZE,
            line_max_size: DEFAULT_LINE_BUFFER_SIZE,
            poll_interval_ms: 50,
            reap_interval_ms: 30_000,
            default_mask: StreamMask::DEFAULT_SUBSCRIPTION,
        }
    }
}

impl BufferConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_millis(self.reap_interval_ms.max(1))
    }

    pub fn stream_options(&self) -> StreamBufferOptions {
        StreamBufferOptions {
            max_size: self.stream_max_size,
            default_mask: self.default_mask,
            poll_interval: self.poll_interval(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

#[derive(Debug, Parser)]
#[command(author, version = crate::version::VERSION, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, clap::Subcommand)]
pub enum Command {
    /// Connect to a game server and mirror its output to stdout.
    Connect(ConnectArgs),
}

#[derive(Debug, Parser, Clone, Default)]
pub struct ConnectArgs {
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub host: Option<String>,
    #[arg(long)]
    pub port: Option<u16>,
    #[arg(long)]
    pub line_ending: Option<LineEnding>,
    /// Channels printed to stdout, e.g. `stripped|script`. Defaults to
    /// `[buffer] default_mask`.
    #[arg(long)]
    pub mask: Option<StreamMask>,
    #[arg(long)]
    pub log_level: Option<String>,
}

impl Config {
    pub fn load(args: &ConnectArgs) -> TapResult<Self> {
        let mut config = if let Some(path) = &args.config {
            Self::from_file(path)?
        } else if Path::new(DEFAULT_CONFIG_FILE).exists() {
            Self::from_file(Path::new(DEFAULT_CONFIG_FILE))?
        } else {
            Self::default()
        };

        config.apply_env();
        config.apply_cli(args);
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> TapResult<Self> {
        let content = fs::read_to_string(path).map_err(|err| {
            ApiError::new(ErrorCode::IoError, "Failed to read config file")
                .with_details(err.to_string())
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> TapResult<Self> {
        toml::from_str(content).map_err(|err| {
            ApiError::new(ErrorCode::InvalidArgument, "Failed to parse config file")
                .with_details(err.to_string())
                .into()
        })
    }

    pub fn validate(&self) -> TapResult<()> {
        self.buffer.default_mask.validate()?;
        if self.game.host.trim().is_empty() {
            return Err(ApiError::new(ErrorCode::InvalidArgument, "Game host is empty").into());
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(value) = env::var("MUDTAP_HOST") {
            self.game.host = value;
        }
        if let Ok(value) = env::var("MUDTAP_PORT")
            && let Ok(port) = value.trim().parse::<u16>()
        {
            self.game.port = port;
        }
        if let Ok(value) = env::var("MUDTAP_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Ok(value) = env::var("MUDTAP_MASK")
            && let Some(mask) = parse_env_mask(&value)
        {
            self.buffer.default_mask = mask;
        }
    }

    fn apply_cli(&mut self, args: &ConnectArgs) {
        if let Some(host) = &args.host {
            self.game.host = host.clone();
        }
        if let Some(port) = args.port {
            self.game.port = port;
        }
        if let Some(line_ending) = args.line_ending {
            self.game.line_ending = line_ending;
        }
        if let Some(level) = &args.log_level {
            self.logging.level = level.clone();
        }
    }
}

impl ConnectArgs {
    /// Mask for the stdout printer: `--mask` if given, else the configured default.
    pub fn printer_mask(&self, config: &Config) -> StreamMask {
        self.mask.unwrap_or(config.buffer.default_mask)
    }
}

fn parse_env_mask(value: &str) -> Option<StreamMask> {
    match value.parse::<StreamMask>() {
        Ok(mask) => Some(mask),
        Err(err) => {
            tracing::warn!(value, error = %err, "Ignoring invalid MUDTAP_MASK");
            None
        }
    }
}
