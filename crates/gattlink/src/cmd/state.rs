use crate::cmd::StateArgs;
use crate::exit::{session_error, CliResult, SUCCESS};
use crate::output::{print_response, OutputFormat};

pub async fn run(args: StateArgs, format: OutputFormat) -> CliResult<i32> {
    let session = args.link.open_session().await?;
    let spec = args.category.spec();
    tracing::debug!(category = spec.key, section = spec.section, "reading state");

    let value = session
        .read_state(args.category)
        .await
        .map_err(|err| session_error("state read failed", err))?;
    print_response(spec.key, &value, format);

    session.close();
    Ok(SUCCESS)
}
