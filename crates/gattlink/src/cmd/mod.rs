use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use gattlink_session::{LimitMode, LinkConfig, Session, StateCategory};
use gattlink_transport::UdsLink;

use crate::exit::{session_error, transport_error, CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod monitor;
pub mod peripheral;
pub mod send;
pub mod state;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a peripheral emulator on a Unix socket.
    Peripheral(PeripheralArgs),
    /// Send one command and print its response.
    Send(SendArgs),
    /// Read one device-state category.
    State(StateArgs),
    /// Print unsolicited events from the peripheral.
    Monitor(MonitorArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub async fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Peripheral(args) => peripheral::run(args).await,
        Command::Send(args) => send::run(args, format).await,
        Command::State(args) => state::run(args, format).await,
        Command::Monitor(args) => monitor::run(args, format).await,
        Command::Version(args) => version::run(args),
    }
}

/// Link settings shared by every subcommand that talks to a peripheral.
#[derive(Args, Debug, Clone)]
pub struct LinkArgs {
    /// Socket path of the peripheral emulator.
    pub path: PathBuf,
    /// JSON link configuration file.
    #[arg(long, value_name = "FILE", env = "GATTLINK_CONFIG")]
    pub config: Option<PathBuf>,
    /// Maximum fragment size.
    #[arg(long, value_name = "N")]
    pub fragment_bytes: Option<usize>,
    /// What the fragment size counts.
    #[arg(long, value_name = "MODE")]
    pub fragment_limit: Option<FragmentLimitArg>,
    /// Pause between fragments (e.g. 200ms, 0ms).
    #[arg(long, value_name = "DURATION")]
    pub delay: Option<String>,
    /// Busy window: how long to wait for a response (e.g. 5s, 500ms).
    #[arg(long, value_name = "DURATION")]
    pub timeout: Option<String>,
}

#[derive(Copy, Clone, Debug, clap::ValueEnum)]
pub enum FragmentLimitArg {
    /// Base64 characters per write.
    Encoded,
    /// Raw bytes per write.
    Raw,
}

impl LinkArgs {
    /// Load the config file (or defaults) and apply command-line overrides.
    pub fn link_config(&self) -> CliResult<LinkConfig> {
        let mut config = match &self.config {
            Some(path) => {
                LinkConfig::from_file(path).map_err(|err| session_error("config load failed", err))?
            }
            None => LinkConfig::default(),
        };

        if let Some(bytes) = self.fragment_bytes {
            config.max_fragment_bytes = bytes;
        }
        if let Some(limit) = self.fragment_limit {
            config.fragment_limit = match limit {
                FragmentLimitArg::Encoded => LimitMode::Encoded,
                FragmentLimitArg::Raw => LimitMode::Raw,
            };
        }
        if let Some(delay) = &self.delay {
            config.inter_fragment_delay_ms = duration_millis(parse_duration(delay)?);
        }
        if let Some(timeout) = &self.timeout {
            config.busy_timeout_ms = duration_millis(parse_duration(timeout)?);
        }

        config
            .validate()
            .map_err(|err| session_error("invalid link settings", err))?;
        Ok(config)
    }

    /// Connect to the emulator and open a session on it.
    pub async fn open_session(&self) -> CliResult<Session<UdsLink>> {
        let config = self.link_config()?;
        let link = UdsLink::connect(&self.path)
            .await
            .map_err(|err| transport_error("connect failed", err))?;
        Session::open(link, config).map_err(|err| session_error("session open failed", err))
    }
}

#[derive(Args, Debug)]
pub struct PeripheralArgs {
    /// Socket path to bind.
    pub path: PathBuf,
    /// JSON link configuration file (fragment size and pacing of responses).
    #[arg(long, value_name = "FILE", env = "GATTLINK_CONFIG")]
    pub config: Option<PathBuf>,
    /// Emit an unsolicited event at this interval (e.g. 1s).
    #[arg(long, value_name = "DURATION")]
    pub notify_every: Option<String>,
    /// Ignore commands with this name (exercises the busy window).
    #[arg(long, value_name = "CMD")]
    pub ignore: Vec<String>,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Command name.
    #[arg(long, required_unless_present = "heartbeat", conflicts_with = "heartbeat")]
    pub cmd: Option<String>,
    /// Command arguments as a JSON object.
    #[arg(long, default_value = "{}", value_name = "JSON")]
    pub args: String,
    /// Send an empty heartbeat message instead of a command.
    #[arg(long)]
    pub heartbeat: bool,
}

#[derive(Args, Debug)]
pub struct StateArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Category to read.
    #[arg(value_parser = parse_category)]
    pub category: StateCategory,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[command(flatten)]
    pub link: LinkArgs,
    /// Exit after printing N events.
    #[arg(long)]
    pub count: Option<usize>,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

fn parse_category(input: &str) -> Result<StateCategory, String> {
    input.parse()
}

/// Parse `500ms`, `2s` or a bare number of seconds.
pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}

fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
