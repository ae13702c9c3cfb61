use bytes::Bytes;
use futures::{Stream, StreamExt};
use murmur_core::provider::{EventStream, StreamEvent, ToolCallDelta};
use reqwest::Response;
use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll};
use tracing::{debug, warn};

use crate::error::{ProviderError, Result};
use crate::models::{ChatCompletionChunk, OpenAIError};

/// Splits a Server-Sent Events byte stream into lines.
///
/// Bytes are buffered until a full line is available, so a multi-byte UTF-8
/// character split across network chunks is decoded intact.
pub struct SseStream {
    inner: Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>,
    buffer: Vec<u8>,
    pending: VecDeque<Result<String>>,
    finished: bool,
}

impl SseStream {
    pub fn new(response: Response) -> Self {
        Self::from_byte_stream(response.bytes_stream().map(|chunk| {
            chunk.map_err(|e| ProviderError::Http {
                operation: "stream_chunk_read".to_string(),
                source: e,
            })
        }))
    }

    pub fn from_byte_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
            buffer: Vec::new(),
            pending: VecDeque::new(),
            finished: false,
        }
    }

    fn drain_lines(&mut self) {
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=newline).collect();
            self.push_line(raw);
        }
    }

    fn push_line(&mut self, raw: Vec<u8>) {
        match String::from_utf8(raw) {
            Ok(text) => {
                let line = text.trim_end_matches(['\r', '\n']);
                if !line.is_empty() {
                    self.pending.push_back(Ok(line.to_string()));
                }
            }
            Err(e) => self.pending.push_back(Err(ProviderError::Stream {
                operation: "decode_utf8".to_string(),
                reason: format!("Invalid UTF-8 in stream: {}", e),
            })),
        }
    }

    /// Decode lines into completion events. The sequence ends after `Done`
    /// or after the first error.
    pub fn into_events(self) -> EventStream {
        let state = EventState {
            lines: self,
            queued: VecDeque::new(),
            finished: false,
        };

        let events = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(event) = state.queued.pop_front() {
                    return Some((Ok(event), state));
                }
                if state.finished {
                    return None;
                }

                match state.lines.next().await {
                    Some(Ok(line)) => match parse_line(&line) {
                        Some(Ok(SseFrame::Done)) => {
                            debug!("Received stream completion marker");
                            state.finished = true;
                            state.queued.push_back(StreamEvent::Done);
                        }
                        Some(Ok(SseFrame::Chunk(chunk))) => {
                            state.queued.extend(chunk_events(&chunk));
                        }
                        Some(Err(e)) => {
                            state.finished = true;
                            return Some((Err(e.into()), state));
                        }
                        None => {}
                    },
                    Some(Err(e)) => {
                        state.finished = true;
                        return Some((Err(e.into()), state));
                    }
                    None => state.finished = true,
                }
            }
        });

        Box::new(events.boxed())
    }
}

struct EventState {
    lines: SseStream,
    queued: VecDeque<StreamEvent>,
    finished: bool,
}

impl Stream for SseStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(line) = self.pending.pop_front() {
                return Poll::Ready(Some(line));
            }
            if self.finished {
                return Poll::Ready(None);
            }

            match self.inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(bytes))) => {
                    self.buffer.extend_from_slice(&bytes);
                    self.drain_lines();
                }
                Poll::Ready(Some(Err(e))) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(e)));
                }
                Poll::Ready(None) => {
                    self.finished = true;
                    if !self.buffer.is_empty() {
                        let rest = std::mem::take(&mut self.buffer);
                        self.push_line(rest);
                    }
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[derive(Debug)]
pub enum SseFrame {
    Chunk(ChatCompletionChunk),
    Done,
}

/// Interpret one SSE line. Comments and non-data fields yield `None`.
pub fn parse_line(line: &str) -> Option<Result<SseFrame>> {
    let Some(data) = line.strip_prefix("data:") else {
        if !(line.starts_with(':')
            || line.starts_with("event:")
            || line.starts_with("id:")
            || line.starts_with("retry:"))
        {
            warn!("Unexpected SSE line format: {}", line);
        }
        return None;
    };

    let data = data.trim_start();
    if data == "[DONE]" {
        return Some(Ok(SseFrame::Done));
    }

    if let Ok(api_error) = serde_json::from_str::<OpenAIError>(data) {
        return Some(Err(ProviderError::Stream {
            operation: "read_chunk".to_string(),
            reason: api_error.error.message,
        }));
    }

    match serde_json::from_str::<ChatCompletionChunk>(data) {
        Ok(chunk) => Some(Ok(SseFrame::Chunk(chunk))),
        Err(e) => {
            warn!("Failed to parse SSE chunk: {}, data: {}", e, data);
            Some(Err(ProviderError::Json {
                operation: "parse_chunk".to_string(),
                source: e,
            }))
        }
    }
}

/// Events carried by one chunk: its content delta first, then tool-call fragments.
pub fn chunk_events(chunk: &ChatCompletionChunk) -> Vec<StreamEvent> {
    let Some(choice) = chunk.choices.first() else {
        return Vec::new();
    };

    let mut events = Vec::new();
    if let Some(content) = choice.delta.content.as_ref().filter(|c| !c.is_empty()) {
        events.push(StreamEvent::ContentDelta(content.clone()));
    }
    for call in &choice.delta.tool_calls {
        let function = call.function.clone().unwrap_or_default();
        events.push(StreamEvent::ToolCallDelta(ToolCallDelta {
            index: call.index,
            id: call.id.clone(),
            name: function.name,
            arguments: function.arguments.unwrap_or_default(),
        }));
    }
    events
}
