use serde_json::Value;

use crate::cmd::SendArgs;
use crate::exit::{session_error, CliError, CliResult, SUCCESS, USAGE};
use crate::output::{print_response, OutputFormat};

pub async fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let session = args.link.open_session().await?;

    if args.heartbeat {
        session
            .heartbeat()
            .await
            .map_err(|err| session_error("heartbeat failed", err))?;
        tracing::info!("heartbeat sent");
        session.close();
        return Ok(SUCCESS);
    }

    let cmd = args
        .cmd
        .as_deref()
        .ok_or_else(|| CliError::new(USAGE, "--cmd is required"))?;
    let command_args = parse_args(&args.args)?;

    let response = session
        .send_command(cmd, command_args)
        .await
        .map_err(|err| session_error("send failed", err))?;
    print_response(cmd, &response, format);

    session.close();
    Ok(SUCCESS)
}

fn parse_args(raw: &str) -> CliResult<Value> {
    let value: Value = serde_json::from_str(raw)
        .map_err(|err| CliError::new(USAGE, format!("--args is not valid JSON: {err}")))?;
    if !value.is_object() {
        return Err(CliError::new(USAGE, "--args must be a JSON object"));
    }
    Ok(value)
}
