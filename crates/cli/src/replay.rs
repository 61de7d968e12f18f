//! Parsing recorded push traffic.
//!
//! A recording is JSON Lines. Each line is either a full event envelope as
//! published on the bus, or a raw push frame `{"event": name, "data": {...}}`
//! as the server sent it. Blank lines and lines starting with `#` are skipped.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value;

use murmur_core::event::{Event, EventSource};

#[derive(Debug, Deserialize)]
struct PushFrame {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Parse one recording line. `Ok(None)` for lines that carry no event.
pub fn parse_line(line: &str) -> Result<Option<Event>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(line).context("line is not JSON")?;
    if value.get("payload").is_some() {
        let event: Event = serde_json::from_value(value).context("malformed event envelope")?;
        return Ok(Some(event));
    }
    if value.get("event").is_none() {
        bail!("expected an event envelope or a push frame");
    }
    let frame: PushFrame = serde_json::from_value(value).context("malformed push frame")?;
    let event = Event::from_push(&frame.event, frame.data)
        .with_context(|| format!("unsupported push event {:?}", frame.event))?;
    Ok(Some(Event {
        source: EventSource::Replay,
        ..event
    }))
}

/// Parse a whole recording, reporting the first bad line by number.
pub fn parse_recording(contents: &str) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        if let Some(event) = parse_line(line).with_context(|| format!("line {}", index + 1))? {
            events.push(event);
        }
    }
    Ok(events)
}
