// SSE decoding. Lines are reassembled across chunk boundaries before parsing.

use crate::error::{ChatError, ChatResult};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use std::fmt::Display;

const DONE_SENTINEL: &str = "[DONE]";

// Only the fields we read; everything else in the chunk is ignored.
#[derive(Deserialize, Debug)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize, Debug)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Debug, Default)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Delta(String),
    Done,
    Skip,
}

// Takes one line off the front of `pending`. Lines end at `\n`, `\r` or
// `\r\n`; a trailing `\r` waits for the next chunk unless input is over.
fn take_line(pending: &mut Vec<u8>, exhausted: bool) -> Option<Vec<u8>> {
    let pos = pending.iter().position(|b| *b == b'\n' || *b == b'\r')?;
    let end = if pending[pos] == b'\r' {
        match pending.get(pos + 1) {
            Some(b'\n') => pos + 1,
            Some(_) => pos,
            None if exhausted => pos,
            None => return None,
        }
    } else {
        pos
    };
    let mut line: Vec<u8> = pending.drain(..=end).collect();
    line.truncate(pos);
    Some(line)
}

fn parse_line(raw: &[u8]) -> ChatResult<Frame> {
    let text = String::from_utf8_lossy(raw);
    let line = text.trim();
    let Some(payload) = line.strip_prefix("data:") else {
        // Blank lines, comments, `event:`/`id:` fields
        return Ok(Frame::Skip);
    };
    let payload = payload.trim();
    if payload.is_empty() {
        return Ok(Frame::Skip);
    }
    if payload == DONE_SENTINEL {
        return Ok(Frame::Done);
    }

    let chunk: StreamChunk =
        serde_json::from_str(payload).map_err(|e| ChatError::StreamParse {
            line: line.to_string(),
            reason: e.to_string(),
        })?;
    match chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
    {
        Some(content) if !content.is_empty() => Ok(Frame::Delta(content)),
        _ => Ok(Frame::Skip),
    }
}

/// Decodes an SSE byte stream into text deltas.
///
/// Ends at `[DONE]` or at end of input. Malformed lines are logged and
/// skipped; a transport error is yielded once and ends the stream.
pub fn decode<S, B, E>(bytes: S) -> impl Stream<Item = ChatResult<String>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    async_stream::stream! {
        futures::pin_mut!(bytes);
        let mut pending: Vec<u8> = Vec::new();
        let mut exhausted = false;

        loop {
            while let Some(line) = take_line(&mut pending, exhausted) {
                match parse_line(&line) {
                    Ok(Frame::Delta(text)) => yield Ok(text),
                    Ok(Frame::Done) => {
                        log::info!("Stream finished with [DONE]");
                        return;
                    }
                    Ok(Frame::Skip) => {}
                    Err(e) => log::warn!("Skipping stream line: {}", e),
                }
            }
            if exhausted {
                break;
            }

            match bytes.next().await {
                Some(Ok(chunk)) => pending.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    log::error!("Error reading stream: {}", e);
                    yield Err(ChatError::Transport(format!("stream interrupted: {}", e)));
                    return;
                }
                None => {
                    exhausted = true;
                    // Flush a final line that had no terminator
                    if !pending.is_empty() {
                        pending.push(b'\n');
                    }
                }
            }
        }
        log::debug!("Stream ended without [DONE]");
    }
}

/// Running concatenation of deltas for one in-flight request.
#[derive(Debug, Default, Clone)]
pub struct StreamBuffer {
    text: String,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a delta and returns the whole buffer so far.
    pub fn push(&mut self, delta: &str) -> &str {
        self.text.push_str(delta);
        &self.text
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

/// Drains a delta stream, calling `on_update` with the running buffer after
/// every delta. Returns the full text, or the first transport error.
pub async fn accumulate<S, F>(deltas: S, mut on_update: F) -> ChatResult<String>
where
    S: Stream<Item = ChatResult<String>>,
    F: FnMut(&str),
{
    futures::pin_mut!(deltas);
    let mut buffer = StreamBuffer::new();
    while let Some(delta) = deltas.next().await {
        let delta = delta?;
        on_update(buffer.push(&delta));
    }
    Ok(buffer.into_string())
}
