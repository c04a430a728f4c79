use std::future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use gattlink_frame::{chunk, FrameError, SentinelCodec};
use gattlink_session::{LinkConfig, StateCategory, GET_CONFIG};
use gattlink_transport::UdsListener;
use serde_json::{json, Value};
use tokio::io::AsyncWriteExt;
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::codec::FramedRead;

use crate::cmd::{parse_duration, PeripheralArgs};
use crate::exit::{io_error, session_error, transport_error, CliResult, SUCCESS};

/// Event key of unsolicited notifications.
const TICK_EVENT: &str = "tick";

struct Emulator {
    config: LinkConfig,
    ignore: Vec<String>,
    notify_every: Option<Duration>,
}

pub async fn run(args: PeripheralArgs) -> CliResult<i32> {
    let config = match &args.config {
        Some(path) => {
            LinkConfig::from_file(path).map_err(|err| session_error("config load failed", err))?
        }
        None => LinkConfig::default(),
    };
    let notify_every = args
        .notify_every
        .as_deref()
        .map(parse_duration)
        .transpose()?
        .filter(|every| !every.is_zero());

    let emulator = Arc::new(Emulator {
        config,
        ignore: args.ignore,
        notify_every,
    });
    let listener =
        UdsListener::bind(&args.path).map_err(|err| transport_error("bind failed", err))?;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|err| io_error("signal handler setup failed", err))?;
                tracing::info!("shutting down");
                break;
            }
            accepted = listener.accept() => {
                let stream = accepted.map_err(|err| transport_error("accept failed", err))?;
                let emulator = Arc::clone(&emulator);
                tokio::spawn(async move {
                    if let Err(err) = emulator.serve(stream).await {
                        tracing::warn!(error = %err, "central connection ended with error");
                    }
                });
            }
        }
    }

    Ok(SUCCESS)
}

impl Emulator {
    async fn serve(&self, stream: UnixStream) -> Result<(), FrameError> {
        let (read, mut write) = stream.into_split();
        let mut messages = FramedRead::new(read, SentinelCodec::new(self.config.max_message_bytes));
        let mut ticker = self.notify_every.map(|every| {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        let mut seq = 0u64;

        loop {
            tokio::select! {
                message = messages.next() => {
                    let Some(message) = message else {
                        tracing::info!("central disconnected");
                        return Ok(());
                    };
                    let message = message?;
                    if message.is_empty() {
                        tracing::debug!("heartbeat");
                        continue;
                    }
                    let Some(reply) = self.answer(&message) else {
                        continue;
                    };
                    self.notify(&mut write, &reply).await?;
                }
                _ = tick(&mut ticker) => {
                    seq += 1;
                    let event = json!({"event": TICK_EVENT, "response": {"seq": seq}});
                    self.notify(&mut write, &event).await?;
                }
            }
        }
    }

    /// Reply to one command, or `None` to stay silent.
    fn answer(&self, message: &[u8]) -> Option<Value> {
        let command: Value = match serde_json::from_slice(message) {
            Ok(command) => command,
            Err(err) => {
                tracing::warn!(error = %err, "ignoring malformed command");
                return None;
            }
        };
        let Some(event) = command.get("event").and_then(Value::as_str) else {
            tracing::warn!("ignoring command without event key");
            return None;
        };
        let cmd = command.get("cmd").and_then(Value::as_str).unwrap_or_default();
        if self.ignore.iter().any(|ignored| ignored == cmd) {
            tracing::info!(event, cmd, "ignoring command");
            return None;
        }
        tracing::info!(event, cmd, "answering command");

        let response = match cmd {
            GET_CONFIG => device_config(),
            "ping" => json!("pong"),
            _ => command.get("args").cloned().unwrap_or(Value::Null),
        };
        Some(json!({"event": event, "response": response}))
    }

    /// Frame `reply` and write it in paced, fragment-sized pieces.
    async fn notify(&self, write: &mut OwnedWriteHalf, reply: &Value) -> Result<(), FrameError> {
        let payload = serde_json::to_vec(reply).map_err(std::io::Error::from)?;
        let frame = self.config.frame_config();
        let fragments = chunk(&payload, frame.fragment_limit.raw_capacity())?;

        for (index, fragment) in fragments.iter().enumerate() {
            if index > 0 && !frame.inter_fragment_delay.is_zero() {
                tokio::time::sleep(frame.inter_fragment_delay).await;
            }
            write.write_all(fragment).await?;
        }
        write.flush().await?;
        Ok(())
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

/// Canned device configuration with one section per state category.
fn device_config() -> Value {
    let mut sections = serde_json::Map::new();
    for category in StateCategory::all() {
        let spec = category.spec();
        sections.insert(
            spec.section.to_string(),
            json!({"category": spec.key, "description": spec.description}),
        );
    }
    if let Some(wifi) = sections.get_mut("wifi") {
        wifi["ssid"] = json!("gattlink-lab");
    }
    Value::Object(sections)
}
