use std::path::Path;
use std::time::Duration;

use log::debug;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::sync::{mpsc, oneshot};

pub const EVENT_LOG_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Something that happened during a stack run.
#[derive(Debug, Clone, PartialEq)]
pub enum StackEvent {
    /// One line of provider output.
    Output(String),
    /// A discrete engine lifecycle event.
    Engine(EngineEvent),
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct EngineEvent {
    pub sequence: u64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl EngineEvent {
    /// Name of the event payload, e.g. `resourcePreEvent` or `summaryEvent`.
    pub fn kind(&self) -> &str {
        self.payload
            .keys()
            .find(|key| key.ends_with("Event"))
            .map(String::as_str)
            .unwrap_or("unknown")
    }
}

/// Splits the complete lines off the front of `pending`, leaving a trailing
/// partial line in place for the next read.
pub fn drain_complete_lines(pending: &mut Vec<u8>) -> Vec<String> {
    let Some(last_newline) = pending.iter().rposition(|b| *b == b'\n') else {
        return vec![];
    };
    let rest = pending.split_off(last_newline + 1);
    let complete = std::mem::replace(pending, rest);
    complete
        .split(|b| *b == b'\n')
        .map(|line| String::from_utf8_lossy(line).trim().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

pub fn parse_engine_event(line: &str) -> Option<EngineEvent> {
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!("Skipping unreadable engine event: {}", e);
            None
        }
    }
}

/// Follows the engine event log written by the CLI until `done` fires, then
/// reads whatever is left and returns.
pub async fn tail_event_log(
    path: &Path,
    events: mpsc::UnboundedSender<StackEvent>,
    mut done: oneshot::Receiver<()>,
) {
    let mut offset: u64 = 0;
    let mut pending = Vec::new();
    let mut ticker = tokio::time::interval(EVENT_LOG_POLL_INTERVAL);

    loop {
        let finished = tokio::select! {
            _ = ticker.tick() => false,
            _ = &mut done => true,
        };

        match read_from(path, offset).await {
            Ok(bytes) => {
                offset += bytes.len() as u64;
                pending.extend_from_slice(&bytes);
                for line in drain_complete_lines(&mut pending) {
                    if let Some(event) = parse_engine_event(&line) {
                        let _ = events.send(StackEvent::Engine(event));
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!("Failed to read event log {}: {}", path.display(), e),
        }

        if finished {
            break;
        }
    }
}

async fn read_from(path: &Path, offset: u64) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(std::io::SeekFrom::Start(offset)).await?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes).await?;
    Ok(bytes)
}
