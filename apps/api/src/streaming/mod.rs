//! Streaming Channel Reader: drives the remote event stream to a validated
//! result.
//!
//! ```text
//! AwaitingChunk ──payload──▶ ChunkReceived ──decoded──▶ Dispatch ──progress/partial──▶ AwaitingChunk
//!       │                          │                        │
//!       └─ end / cancel / io ──────┴──── malformed ─────────┴── complete/error ──▶ Terminal
//! ```
//!
//! Chunks are handed to the [`ChunkHandler`] in arrival order, exactly once.

pub mod sse;

use std::collections::VecDeque;
use std::time::Instant;

use futures::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::capability::{ByteStream, CapabilityError};
use crate::models::analysis::{validate_remote_result, AnalysisResult, ProcessingMetadata};
use crate::models::streaming::StreamingChunk;
use crate::streaming::sse::SseDecoder;

/// Intermediate events surfaced to the caller while a stream is in flight.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnalysisEvent {
    Progress {
        percent: f64,
        stage: String,
        message: String,
    },
    Partial {
        section: String,
        content: serde_json::Value,
    },
}

/// Per-tag callbacks for non-terminal chunks.
pub trait ChunkHandler: Send {
    fn on_progress(&mut self, _percent: f64, _stage: &str, _message: &str) {}

    fn on_partial(&mut self, _section: &str, _content: &serde_json::Value) {}
}

/// Drops every intermediate chunk.
pub struct Discard;

impl ChunkHandler for Discard {}

impl ChunkHandler for mpsc::UnboundedSender<AnalysisEvent> {
    fn on_progress(&mut self, percent: f64, stage: &str, message: &str) {
        // The receiver going away only means nobody is listening.
        let _ = self.send(AnalysisEvent::Progress {
            percent,
            stage: stage.to_string(),
            message: message.to_string(),
        });
    }

    fn on_partial(&mut self, section: &str, content: &serde_json::Value) {
        let _ = self.send(AnalysisEvent::Partial {
            section: section.to_string(),
            content: content.clone(),
        });
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("stream ended without result")]
    EndedWithoutResult,

    #[error("malformed chunk: {0}")]
    MalformedChunk(String),

    #[error("complete chunk carried an invalid result: {}", .0.join("; "))]
    InvalidResult(Vec<String>),

    #[error("remote reported {code}: {message}")]
    Remote {
        code: String,
        message: String,
        retryable: bool,
    },

    #[error("stream transport failed: {0}")]
    Transport(CapabilityError),

    #[error("stream cancelled")]
    Cancelled,
}

enum ReadState {
    AwaitingChunk,
    ChunkReceived(String),
    Dispatch(StreamingChunk),
    Terminal(Result<AnalysisResult, StreamError>),
}

pub struct StreamReader<'a> {
    handler: &'a mut dyn ChunkHandler,
    cancel: CancellationToken,
}

impl<'a> StreamReader<'a> {
    pub fn new(handler: &'a mut dyn ChunkHandler, cancel: CancellationToken) -> Self {
        Self { handler, cancel }
    }

    /// Consumes `stream` until a terminal chunk, its end, or cancellation.
    /// The stream is dropped on return, which releases the connection.
    pub async fn read(self, mut stream: ByteStream) -> Result<AnalysisResult, StreamError> {
        let started = Instant::now();
        let mut decoder = SseDecoder::new();
        let mut pending: VecDeque<String> = VecDeque::new();
        let mut ended = false;
        let mut state = ReadState::AwaitingChunk;

        loop {
            state = match state {
                ReadState::AwaitingChunk => {
                    if let Some(payload) = pending.pop_front() {
                        ReadState::ChunkReceived(payload)
                    } else if ended {
                        ReadState::Terminal(Err(StreamError::EndedWithoutResult))
                    } else {
                        tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => ReadState::Terminal(Err(StreamError::Cancelled)),
                            next = stream.next() => match next {
                                Some(Ok(bytes)) => {
                                    pending.extend(decoder.push(&bytes));
                                    ReadState::AwaitingChunk
                                }
                                Some(Err(e)) => ReadState::Terminal(Err(StreamError::Transport(e))),
                                None => {
                                    ended = true;
                                    pending.extend(decoder.finish());
                                    ReadState::AwaitingChunk
                                }
                            },
                        }
                    }
                }

                ReadState::ChunkReceived(payload) => {
                    match serde_json::from_str::<StreamingChunk>(&payload) {
                        Ok(chunk) => ReadState::Dispatch(chunk),
                        Err(e) => ReadState::Terminal(Err(StreamError::MalformedChunk(e.to_string()))),
                    }
                }

                ReadState::Dispatch(chunk) => {
                    debug!("Stream chunk: {}", chunk.tag());
                    match chunk {
                        StreamingChunk::Progress {
                            percent,
                            stage,
                            message,
                        } => {
                            self.handler.on_progress(percent.clamp(0.0, 100.0), &stage, &message);
                            ReadState::AwaitingChunk
                        }
                        StreamingChunk::Partial { section, content } => {
                            self.handler.on_partial(&section, &content);
                            ReadState::AwaitingChunk
                        }
                        StreamingChunk::Complete { result } => {
                            let metadata =
                                ProcessingMetadata::remote(started.elapsed().as_millis() as u64);
                            ReadState::Terminal(
                                validate_remote_result(result, metadata)
                                    .map_err(StreamError::InvalidResult),
                            )
                        }
                        StreamingChunk::Error {
                            code,
                            message,
                            retryable,
                        } => ReadState::Terminal(Err(StreamError::Remote {
                            code,
                            message,
                            retryable,
                        })),
                    }
                }

                ReadState::Terminal(outcome) => {
                    drop(stream);
                    return outcome;
                }
            };
        }
    }
}
