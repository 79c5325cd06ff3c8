use crate::error::CompletionError;
use crate::models::ConversationMessage;
use crate::traits::{CompletionProvider, CompletionStream};
use crate::wire::FrameDecoder;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const OPENAI_CHAT_MODEL: &str = "gpt-4";
pub const HUGGINGFACE_CHAT_MODEL: &str = "meta-llama/Llama-3.1-70B-Instruct";

const DONE_MARKER: &str = "[DONE]";

#[derive(Debug, Clone)]
pub struct CompletionConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
}

impl CompletionConfig {
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: crate::embeddings::openai::OPENAI_BASE_URL.to_string(),
            model: OPENAI_CHAT_MODEL.to_string(),
        }
    }

    /// HuggingFace inference endpoints speak the OpenAI chat protocol.
    pub fn huggingface(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: endpoint.into(),
            model: HUGGINGFACE_CHAT_MODEL.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ConversationMessage],
    stream: bool,
}

#[derive(Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

/// Streaming chat completions against an OpenAI-compatible endpoint.
pub struct OpenAiCompatibleClient {
    config: CompletionConfig,
    client: Client,
}

impl OpenAiCompatibleClient {
    pub fn new(config: CompletionConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }
}

#[async_trait]
impl CompletionProvider for OpenAiCompatibleClient {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    async fn stream_completion(
        &self,
        messages: &[ConversationMessage],
    ) -> Result<CompletionStream, CompletionError> {
        let mut request = self
            .client
            .post(format!(
                "{}/chat/completions",
                self.config.base_url.trim_end_matches('/')
            ))
            .json(&ChatCompletionRequest {
                model: &self.config.model,
                messages,
                stream: true,
            });

        if !self.config.api_key.is_empty() {
            request = request.bearer_auth(&self.config.api_key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(CompletionError::RateLimited);
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(CompletionError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(CompletionError::from));
        Ok(fragments(bytes.boxed()))
    }
}

struct FragmentState {
    bytes: BoxStream<'static, Result<Vec<u8>, CompletionError>>,
    frames: FrameDecoder,
    ready: VecDeque<String>,
    done: bool,
}

/// Turns a provider byte stream into content fragments, ending at `[DONE]`.
pub fn fragments(
    bytes: BoxStream<'static, Result<Vec<u8>, CompletionError>>,
) -> CompletionStream {
    let state = FragmentState {
        bytes,
        frames: FrameDecoder::new(),
        ready: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(fragment) = state.ready.pop_front() {
                return Some((Ok(fragment), state));
            }
            if state.done {
                return None;
            }

            loop {
                match state.frames.next_payload() {
                    Ok(Some(payload)) if payload.trim() == DONE_MARKER => {
                        state.done = true;
                        break;
                    }
                    Ok(Some(payload)) => match parse_chunk(&payload) {
                        Ok(Some(fragment)) => state.ready.push_back(fragment),
                        Ok(None) => {}
                        Err(error) => {
                            state.done = true;
                            return Some((Err(error), state));
                        }
                    },
                    Ok(None) => break,
                    Err(error) => {
                        state.done = true;
                        return Some((Err(CompletionError::Parse(error.to_string())), state));
                    }
                }
            }

            if !state.ready.is_empty() || state.done {
                continue;
            }

            match state.bytes.next().await {
                Some(Ok(bytes)) => state.frames.push(&bytes),
                Some(Err(error)) => {
                    state.done = true;
                    return Some((Err(error), state));
                }
                None => {
                    state.done = true;
                    if state.frames.has_partial_frame() {
                        let error = "stream ended inside a frame".to_string();
                        return Some((Err(CompletionError::Parse(error)), state));
                    }
                }
            }
        }
    })
    .boxed()
}

fn parse_chunk(payload: &str) -> Result<Option<String>, CompletionError> {
    let chunk: ChatCompletionChunk =
        serde_json::from_str(payload).map_err(|error| CompletionError::Parse(error.to_string()))?;

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|content| !content.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    fn byte_stream(pieces: Vec<String>) -> BoxStream<'static, Result<Vec<u8>, CompletionError>> {
        stream::iter(pieces.into_iter().map(|piece| Ok(piece.into_bytes()))).boxed()
    }

    fn delta(content: &str) -> String {
        format!(
            "data: {{\"choices\":[{{\"index\":0,\"delta\":{{\"content\":{}}}}}]}}\n\n",
            serde_json::to_string(content).unwrap()
        )
    }

    #[tokio::test]
    async fn fragments_follow_provider_deltas() {
        let body = format!(
            "data: {{\"choices\":[{{\"delta\":{{\"role\":\"assistant\"}}}}]}}\n\n{}{}{}data: [DONE]\n\n",
            delta("Hel"),
            delta("lo wor"),
            delta("ld")
        );
        let (head, tail) = body.split_at(37);

        let pieces = vec![head.to_string(), tail.to_string()];
        let collected: Vec<String> = fragments(byte_stream(pieces))
            .map(|fragment| fragment.unwrap())
            .collect()
            .await;

        assert_eq!(collected, vec!["Hel", "lo wor", "ld"]);
    }

    #[tokio::test]
    async fn nothing_after_done_is_read() {
        let body = "data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n";
        let collected: Vec<_> = fragments(byte_stream(vec![body.to_string()])).collect().await;
        assert!(collected.is_empty());
    }

    #[tokio::test]
    async fn transport_errors_end_the_stream() {
        let bytes = stream::iter(vec![
            Ok(delta("partial").into_bytes()),
            Err(CompletionError::RateLimited),
            Ok(delta("never").into_bytes()),
        ])
        .boxed();

        let collected: Vec<_> = fragments(bytes).collect().await;

        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].as_deref().ok(), Some("partial"));
        assert!(matches!(collected[1], Err(CompletionError::RateLimited)));
    }

    #[tokio::test]
    async fn crlf_framed_providers_are_understood() {
        let body = delta("Hi").replace("\n\n", "\r\n\r\n") + "data: [DONE]\r\n\r\n";
        let collected: Vec<String> = fragments(byte_stream(vec![body]))
            .map(|fragment| fragment.unwrap())
            .collect()
            .await;
        assert_eq!(collected, vec!["Hi"]);
    }

    #[tokio::test]
    async fn cut_off_frame_at_eof_is_a_parse_error() {
        let body = format!("{}data: {{\"choices\":[{{\"del", delta("partial"));
        let collected: Vec<_> = fragments(byte_stream(vec![body])).collect().await;

        assert_eq!(collected.len(), 2);
        assert_eq!(collected[0].as_deref().ok(), Some("partial"));
        assert!(matches!(collected[1], Err(CompletionError::Parse(_))));
    }

    #[test]
    fn request_serializes_lowercase_roles() {
        let messages = vec![ConversationMessage {
            role: Role::System,
            content: "be brief".to_string(),
        }];
        let body = serde_json::to_value(ChatCompletionRequest {
            model: "gpt-4",
            messages: &messages,
            stream: true,
        })
        .unwrap();
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["stream"], true);
    }
}
