//! `data: <json>\n\n` framing for chat events.
//!
//! The encoder writes one frame per event. The decoders accept arbitrary
//! byte chunks: a chunk may end inside a frame (or inside a UTF-8
//! sequence) and may carry several frames at once.

use crate::error::WireError;
use crate::models::SourceDocument;
use serde::{Deserialize, Serialize};

const FRAME_TERMINATORS: [&[u8]; 2] = [b"\n\n", b"\r\n\r\n"];
const DATA_FIELD: &str = "data:";

pub const GENERIC_ERROR_MESSAGE: &str = "Internal Server Error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamEvent {
    #[serde(rename = "pdf-detail")]
    SourceReference { id: String, name: String, path: String },

    #[serde(rename = "ai-content")]
    Content { content: String },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "end")]
    End,
}

impl StreamEvent {
    pub fn source(document: &SourceDocument) -> Self {
        Self::SourceReference {
            id: document.id.clone(),
            name: document.file_name.clone(),
            path: document.file_path.clone(),
        }
    }

    pub fn content(fragment: impl Into<String>) -> Self {
        Self::Content {
            content: fragment.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// `end` and `error` both close the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::End | Self::Error { .. })
    }
}

pub fn encode_event(event: &StreamEvent) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(event)?;
    Ok(format!("{DATA_FIELD} {json}\n\n"))
}

/// Splits a byte stream into the `data` payloads of complete frames.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Next complete frame that carries data; frames with only comments or
    /// other fields are skipped.
    pub fn next_payload(&mut self) -> Result<Option<String>, WireError> {
        while let Some(end) = frame_end(&self.buffer) {
            let frame: Vec<u8> = self.buffer.drain(..end).collect();
            let frame = String::from_utf8(frame)?;
            if let Some(payload) = frame_payload(&frame) {
                return Ok(Some(payload));
            }
        }
        Ok(None)
    }

    pub fn has_partial_frame(&self) -> bool {
        self.buffer.iter().any(|byte| !byte.is_ascii_whitespace())
    }
}

/// Offset just past the first blank line, whichever line ending it uses.
fn frame_end(buffer: &[u8]) -> Option<usize> {
    (0..buffer.len()).find_map(|start| {
        FRAME_TERMINATORS
            .iter()
            .find(|terminator| buffer[start..].starts_with(terminator))
            .map(|terminator| start + terminator.len())
    })
}

fn frame_payload(frame: &str) -> Option<String> {
    let lines: Vec<&str> = frame
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter_map(|line| line.strip_prefix(DATA_FIELD))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Client-side decoder turning received bytes back into [`StreamEvent`]s.
#[derive(Debug, Default)]
pub struct EventDecoder {
    frames: FrameDecoder,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<StreamEvent>, WireError> {
        self.frames.push(bytes);

        let mut events = Vec::new();
        while let Some(payload) = self.frames.next_payload()? {
            events.push(serde_json::from_str(&payload)?);
        }
        Ok(events)
    }

    /// Call once the transport closes; leftover bytes mean a cut-off frame.
    pub fn finish(self) -> Result<(), WireError> {
        if self.frames.has_partial_frame() {
            return Err(WireError::TruncatedFrame);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_events() -> Vec<StreamEvent> {
        vec![
            StreamEvent::SourceReference {
                id: "doc-1".to_string(),
                name: "manual.pdf".to_string(),
                path: "uploads/doc-1.pdf".to_string(),
            },
            StreamEvent::content("Hel"),
            StreamEvent::content("lo wörld\n\nwith blank lines"),
            StreamEvent::error("Internal Server Error"),
            StreamEvent::End,
        ]
    }

    #[test]
    fn events_use_the_expected_type_tags() {
        let encoded = encode_event(&StreamEvent::content("hi")).unwrap();
        assert_eq!(encoded, "data: {\"type\":\"ai-content\",\"content\":\"hi\"}\n\n");

        let end = encode_event(&StreamEvent::End).unwrap();
        assert_eq!(end, "data: {\"type\":\"end\"}\n\n");

        let source = encode_event(&sample_events()[0]).unwrap();
        assert!(source.starts_with("data: {\"type\":\"pdf-detail\""));
    }

    #[test]
    fn decoder_survives_every_chunk_size() {
        let events = sample_events();
        let bytes: Vec<u8> = events
            .iter()
            .flat_map(|event| encode_event(event).unwrap().into_bytes())
            .collect();

        for size in 1..=bytes.len() {
            let mut decoder = EventDecoder::new();
            let mut decoded = Vec::new();
            for piece in bytes.chunks(size) {
                decoded.extend(decoder.push(piece).unwrap());
            }
            assert_eq!(decoded, events, "chunk size {size}");
            decoder.finish().unwrap();
        }
    }

    #[test]
    fn comments_and_crlf_frames_are_tolerated() {
        let mut decoder = EventDecoder::new();
        let events = decoder
            .push(b": keep-alive\n\nevent: message\r\ndata: {\"type\":\"end\"}\r\n\n")
            .unwrap();
        assert_eq!(events, vec![StreamEvent::End]);
    }

    #[test]
    fn truncated_stream_is_reported() {
        let mut decoder = EventDecoder::new();
        assert!(decoder.push(b"data: {\"type\":\"e").unwrap().is_empty());
        assert!(matches!(decoder.finish(), Err(WireError::TruncatedFrame)));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let mut decoder = EventDecoder::new();
        assert!(matches!(
            decoder.push(b"data: {nope}\n\n"),
            Err(WireError::InvalidJson(_))
        ));
    }

    #[test]
    fn raw_frames_expose_provider_payloads() {
        let mut frames = FrameDecoder::new();
        frames.push(b"data: {\"a\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(frames.next_payload().unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(frames.next_payload().unwrap().as_deref(), Some("[DONE]"));
        assert_eq!(frames.next_payload().unwrap(), None);
    }

    #[test]
    fn crlf_terminated_frames_are_split() {
        let mut frames = FrameDecoder::new();
        frames.push(b"data: {\"a\":1}\r\n\r\ndata: [DO");
        assert_eq!(frames.next_payload().unwrap().as_deref(), Some("{\"a\":1}"));
        assert_eq!(frames.next_payload().unwrap(), None);

        frames.push(b"NE]\r\n\r\n");
        assert_eq!(frames.next_payload().unwrap().as_deref(), Some("[DONE]"));
        assert!(!frames.has_partial_frame());
    }
}
