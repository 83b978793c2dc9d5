use std::collections::VecDeque;

use futures::StreamExt as _;
use futures::stream;

use super::{ByteStream, FrameStream};

/// Payload the backend sends to mark the end of the answer.
pub const DONE_SENTINEL: &str = "[DONE]";

/// One `event`/`data` pair received over the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// Value of the `event:` line, if present.
    pub event: Option<String>,
    /// Joined `data:` lines.
    pub data: String,
}

impl SseFrame {
    pub fn new(event: Option<&str>, data: impl Into<String>) -> Self {
        Self {
            event: event.map(ToOwned::to_owned),
            data: data.into(),
        }
    }

    /// Shorthand for a frame without an `event:` line.
    pub fn data(data: impl Into<String>) -> Self {
        Self::new(None, data)
    }

    /// True for the `[DONE]` terminator.
    pub fn is_done(&self) -> bool {
        self.data.trim() == DONE_SENTINEL
    }
}

/// Incremental decoder that splits a byte stream into frames.
///
/// Chunks may end anywhere, including inside a multi-byte character; bytes
/// are buffered until a blank line closes the frame.
#[derive(Default)]
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Bytes of `buf` already known to hold no complete delimiter.
    scanned: usize,
}

impl SseDecoder {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        // A delimiter may straddle the previous chunk boundary.
        let mut from = self.scanned.saturating_sub(3);
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf, from) {
            let frame_bytes: Vec<u8> = self.buf.drain(..idx + delim_len).take(idx).collect();
            if let Some(frame) = parse_sse_frame(&frame_bytes) {
                frames.push(frame);
            }
            from = 0;
        }
        self.scanned = self.buf.len();
        frames
    }

    /// Parses whatever is left in the buffer as a final frame.
    ///
    /// Only used when the whole body is known up front; a live stream that
    /// ends mid-frame drops the partial frame.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        parse_sse_frame(&rest)
    }
}

/// Finds the first blank line at or after `from`, returning its offset and
/// length.
fn find_frame_delimiter(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    (from..buf.len()).find_map(|i| {
        let rest = &buf[i..];
        if rest.starts_with(b"\n\n") {
            Some((i, 2))
        } else if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else {
            None
        }
    })
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut event: Option<String> = None;
    let mut data_lines: Vec<String> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.strip_prefix(' ').unwrap_or(rest).to_string());
        }
    }
    if event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data_lines.join("\n"),
    })
}

/// Decodes a complete body that is already in memory.
pub fn decode_all(text: &str) -> Vec<SseFrame> {
    let mut decoder = SseDecoder::default();
    let mut frames = decoder.push_chunk(text.as_bytes());
    frames.extend(decoder.finish());
    frames
}

/// Turns a response byte stream into a stream of frames.
///
/// The stream ends after the first read error.
pub(crate) fn frame_stream(bytes_stream: ByteStream) -> FrameStream {
    struct State {
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<SseFrame>,
        done: bool,
    }

    Box::pin(stream::try_unfold(
        State {
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(frame) = state.pending.pop_front() {
                    return Ok(Some((frame, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => {
                        state.pending.extend(state.decoder.push_chunk(&chunk));
                    }
                    Some(Err(e)) => return Err(e),
                    None => {
                        state.done = true;
                    }
                }
            }
        },
    ))
}
