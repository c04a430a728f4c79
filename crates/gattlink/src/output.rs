use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use gattlink_session::InboundMessage;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

/// One line of command output.
#[derive(Serialize)]
struct Record<'a> {
    kind: &'a str,
    /// Command name for responses, correlation key for events.
    name: &'a str,
    value: &'a Value,
    timestamp: String,
}

pub fn print_response(cmd: &str, response: &Value, format: OutputFormat) {
    print_record("response", cmd, response, format);
}

pub fn print_event(event: &InboundMessage, format: OutputFormat) {
    print_record("event", event.event.as_str(), &event.response, format);
}

fn print_record(kind: &str, name: &str, value: &Value, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = Record {
                kind,
                name,
                value,
                timestamp: now_unix_seconds(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["KIND", "NAME", "FIELD", "VALUE"]);
            for (field, value) in flatten(value) {
                table.add_row(vec![kind.to_string(), name.to_string(), field, value]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            let body = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
            println!("{kind} {name}:\n{body}");
        }
        OutputFormat::Raw => {
            print_raw(value.to_string().as_bytes());
        }
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.write_all(b"\n");
    let _ = out.flush();
}

/// Top-level fields of an object as rows; anything else as a single row.
fn flatten(value: &Value) -> Vec<(String, String)> {
    match value {
        Value::Object(fields) if !fields.is_empty() => fields
            .iter()
            .map(|(field, value)| (field.clone(), scalar(value)))
            .collect(),
        other => vec![("-".to_string(), scalar(other))],
    }
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
