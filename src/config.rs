use std::path::Path;
use std::time::Duration;

use clap::{Parser, Subcommand};
use config::{Config, Environment, File};
use serde::Deserialize;

/// Prefix for environment overrides, e.g. `ANSWER_STREAM__SERVER__PORT=8000`.
pub const ENV_PREFIX: &str = "ANSWER_STREAM";

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, env = "CONFIG_FILE", global = true)]
    pub config: Option<String>,

    /// Port to listen on
    #[arg(long, env = "PORT", global = true)]
    pub port: Option<u16>,

    /// Address to bind
    #[arg(long, env = "HOST", global = true)]
    pub host: Option<String>,

    /// Remote answer producer; the built-in mock producer is used when unset
    #[arg(long, env = "UPSTREAM_URL", global = true)]
    pub upstream_url: Option<String>,

    /// Delay between expanded answer events, in milliseconds
    #[arg(long, env = "REVEAL_DELAY_MS", global = true)]
    pub reveal_delay_ms: Option<u64>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default)
    Serve,
    /// Ask one question and print the streamed answer
    Ask {
        /// The question to ask
        question: String,
    },
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub pacing: PacingConfig,
    pub log: LogConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Remote producer endpoint. `None` selects the in-process producer.
    pub url: Option<String>,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PacingConfig {
    pub reveal_delay_ms: u64,
    pub producer_step_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogConfig {
    pub format: LogFormat,
}

impl UpstreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl PacingConfig {
    pub fn reveal_delay(&self) -> Duration {
        Duration::from_millis(self.reveal_delay_ms)
    }

    pub fn producer_step_delay(&self) -> Duration {
        Duration::from_millis(self.producer_step_delay_ms)
    }
}

impl AppConfig {
    pub fn load() -> Result<(Self, Command), config::ConfigError> {
        Self::load_from_args(std::env::args())
    }

    /// Parse `args` and build the layered configuration.
    ///
    /// Precedence, lowest first: defaults, config file, `ANSWER_STREAM__*`
    /// environment, CLI flags (and their env vars).
    pub fn load_from_args<I, T>(args: I) -> Result<(Self, Command), config::ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let cli =
            Cli::try_parse_from(args).map_err(|e| config::ConfigError::Message(e.to_string()))?;
        let command = cli.command.clone().unwrap_or(Command::Serve);
        Ok((Self::from_cli(&cli)?, command))
    }

    pub fn from_cli(cli: &Cli) -> Result<Self, config::ConfigError> {
        let mut builder = Config::builder()
            .set_default("server.port", 3000)?
            .set_default("server.host", "0.0.0.0")?
            .set_default("upstream.timeout_secs", 10)?
            .set_default("pacing.reveal_delay_ms", 40)?
            .set_default("pacing.producer_step_delay_ms", 300)?
            .set_default("log.format", "text")?;

        builder = match &cli.config {
            Some(path) => builder.add_source(File::from(Path::new(path)).required(true)),
            None => builder.add_source(File::with_name("config").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        if let Some(port) = cli.port {
            builder = builder.set_override("server.port", port)?;
        }
        if let Some(host) = &cli.host {
            builder = builder.set_override("server.host", host.as_str())?;
        }
        if let Some(url) = &cli.upstream_url {
            builder = builder.set_override("upstream.url", url.as_str())?;
        }
        if let Some(delay) = cli.reveal_delay_ms {
            builder = builder.set_override("pacing.reveal_delay_ms", delay)?;
        }

        let cfg: Self = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), config::ConfigError> {
        if let Some(url) = &self.upstream.url {
            url::Url::parse(url).map_err(|e| {
                config::ConfigError::Message(format!("invalid upstream.url '{url}': {e}"))
            })?;
        }
        Ok(())
    }
}
