mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "gattlink", version, about = "Framed command/response link CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", env = "GATTLINK_LOG_LEVEL", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format).await;

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_send_subcommand() {
        let cli = Cli::try_parse_from([
            "gattlink",
            "send",
            "/tmp/test.sock",
            "--cmd",
            "get_config",
            "--args",
            "{}",
        ])
        .expect("send args should parse");

        assert!(matches!(cli.command, Command::Send(_)));
    }

    #[test]
    fn send_requires_command_or_heartbeat() {
        let err = Cli::try_parse_from(["gattlink", "send", "/tmp/test.sock"])
            .expect_err("send without --cmd should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);

        let err = Cli::try_parse_from([
            "gattlink",
            "send",
            "/tmp/test.sock",
            "--cmd",
            "ping",
            "--heartbeat",
        ])
        .expect_err("conflicting args should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_state_category() {
        let cli = Cli::try_parse_from(["gattlink", "state", "/tmp/test.sock", "speak"])
            .expect("state args should parse");
        assert!(matches!(cli.command, Command::State(_)));

        let err = Cli::try_parse_from(["gattlink", "state", "/tmp/test.sock", "volume"])
            .expect_err("unknown category should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::ValueValidation);
    }

    #[test]
    fn parses_link_overrides() {
        let cli = Cli::try_parse_from([
            "gattlink",
            "monitor",
            "/tmp/test.sock",
            "--fragment-bytes",
            "20",
            "--fragment-limit",
            "raw",
            "--delay",
            "50ms",
            "--count",
            "3",
        ])
        .expect("monitor args should parse");
        assert!(matches!(cli.command, Command::Monitor(_)));
    }
}
