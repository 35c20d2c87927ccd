//! Result rendering and the NDJSON event stream.
//!
//! Every stream line is the serialized event object plus `seq` (starting at 1)
//! and `ts`, written and flushed immediately:
//!
//! ```text
//! {"seq":1,"ts":"2026-01-05T10:00:00Z","event":"start","source_id":"ep-42",...}
//! ```

use std::io::Write;

use harvest_core::UtcDateTime;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::CliError;

/// Prints the command result on stdout.
pub fn render(value: &Value, pretty: bool) -> Result<(), CliError> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    if pretty {
        serde_json::to_writer_pretty(&mut handle, value)?;
    } else {
        serde_json::to_writer(&mut handle, value)?;
    }
    handle.write_all(b"\n")?;
    handle.flush()?;
    Ok(())
}

/// Writer for newline-delimited lifecycle events.
///
/// Not thread-safe; owned by the single task forwarding one event stream.
pub struct EventStreamWriter<W: Write> {
    writer: W,
    next_seq: u64,
}

impl<W: Write> EventStreamWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            next_seq: 1,
        }
    }

    /// Writes one event. Events must serialize to JSON objects.
    pub fn emit<T: Serialize>(&mut self, event: &T) -> Result<(), CliError> {
        let mut line = Map::new();
        line.insert(String::from("seq"), Value::from(self.next_seq));
        line.insert(
            String::from("ts"),
            Value::String(UtcDateTime::now().format_rfc3339()),
        );
        match serde_json::to_value(event)? {
            Value::Object(fields) => line.extend(fields),
            other => {
                line.insert(String::from("data"), other);
            }
        }
        self.next_seq += 1;

        serde_json::to_writer(&mut self.writer, &Value::Object(line))?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
