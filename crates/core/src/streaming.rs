use crate::error::StreamError;
use crate::models::{ConversationMessage, SourceDocument};
use crate::traits::CompletionProvider;
use crate::wire::{StreamEvent, GENERIC_ERROR_MESSAGE};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Sink for the events of one answer. A bounded channel makes a slow client
/// pause the completion loop instead of growing a buffer.
pub type EventSink = mpsc::Sender<StreamEvent>;

pub struct CompletionStreamer<C> {
    provider: C,
}

impl<C: CompletionProvider> CompletionStreamer<C> {
    pub fn new(provider: C) -> Self {
        Self { provider }
    }

    pub fn provider(&self) -> &C {
        &self.provider
    }

    /// Streams one answer into `sink` and returns the full reply text.
    ///
    /// Emits one `pdf-detail` event per source, one `ai-content` event per
    /// provider fragment, then `end`. A provider failure emits a single
    /// `error` event instead of `end`. Once the receiver is gone the completion
    /// stream is dropped, which closes the provider connection, even while the
    /// provider is still silent.
    pub async fn stream(
        &self,
        messages: &[ConversationMessage],
        sources: &[SourceDocument],
        sink: &EventSink,
    ) -> Result<String, StreamError> {
        let mut reply = String::new();

        for source in sources {
            send(sink, StreamEvent::source(source), &reply).await?;
        }

        let opened = tokio::select! {
            _ = sink.closed() => return Err(disconnected(&reply)),
            opened = self.provider.stream_completion(messages) => opened,
        };
        let mut fragments = match opened {
            Ok(fragments) => fragments,
            Err(error) => {
                warn!(model = self.provider.model_name(), %error, "completion request failed");
                send(sink, StreamEvent::error(GENERIC_ERROR_MESSAGE), &reply).await?;
                return Err(StreamError::Provider {
                    source: error,
                    partial: reply,
                });
            }
        };

        debug!(
            model = self.provider.model_name(),
            sources = sources.len(),
            "completion stream opened"
        );

        loop {
            let next = tokio::select! {
                _ = sink.closed() => return Err(disconnected(&reply)),
                next = fragments.next() => next,
            };
            let Some(fragment) = next else { break };

            match fragment {
                Ok(fragment) => {
                    reply.push_str(&fragment);
                    send(sink, StreamEvent::content(fragment), &reply).await?;
                }
                Err(error) => {
                    warn!(
                        model = self.provider.model_name(),
                        %error,
                        streamed_chars = reply.len(),
                        "completion failed mid-stream"
                    );
                    send(sink, StreamEvent::error(GENERIC_ERROR_MESSAGE), &reply).await?;
                    return Err(StreamError::Provider {
                        source: error,
                        partial: reply,
                    });
                }
            }
        }

        send(sink, StreamEvent::End, &reply).await?;
        info!(
            model = self.provider.model_name(),
            reply_chars = reply.len(),
            "completion streamed"
        );
        Ok(reply)
    }
}

async fn send(sink: &EventSink, event: StreamEvent, reply: &str) -> Result<(), StreamError> {
    sink.send(event).await.map_err(|_| disconnected(reply))
}

fn disconnected(reply: &str) -> StreamError {
    info!(streamed_chars = reply.len(), "client disconnected, abandoning stream");
    StreamError::Disconnected {
        partial: reply.to_string(),
    }
}
