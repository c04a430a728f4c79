use crate::cmd::MonitorArgs;
use crate::exit::{io_error, CliError, CliResult, FAILURE, SUCCESS};
use crate::output::{print_event, OutputFormat};

pub async fn run(args: MonitorArgs, format: OutputFormat) -> CliResult<i32> {
    let session = args.link.open_session().await?;
    let mut events = session
        .take_events()
        .ok_or_else(|| CliError::new(FAILURE, "event stream unavailable"))?;

    let mut printed = 0usize;
    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|err| io_error("signal handler setup failed", err))?;
                tracing::info!(printed, "interrupted");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else {
                    tracing::info!(printed, "link closed");
                    break;
                };
                print_event(&event, format);
                printed += 1;
                if args.count.is_some_and(|count| printed >= count) {
                    break;
                }
            }
        }
    }

    session.close();
    Ok(SUCCESS)
}
