//! Incremental server-sent-events decoder for streamed chat completions.
//!
//! Bytes are buffered until a full line is available, so multi-byte UTF-8
//! sequences split across network chunks are never decoded in halves.

use serde_json::Value;
use specter_shared::{Result, SpecterError};

/// Terminator payload sent by OpenAI-compatible servers.
const DONE_MARKER: &str = "[DONE]";

/// One dispatched SSE event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SseEvent {
    /// The joined `data:` lines of one event.
    Data(String),
    /// The `[DONE]` terminator.
    Done,
}

/// Line-oriented SSE decoder fed with raw byte chunks.
#[derive(Debug, Default)]
pub(crate) struct SseDecoder {
    buffer: Vec<u8>,
    data_lines: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk and return every event completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
            self.absorb_line(line.trim_end_matches('\r'), &mut events);
        }
        events
    }

    /// Flush a trailing unterminated line and any undispatched event.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest).into_owned();
            self.absorb_line(line.trim_end_matches('\r'), &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn absorb_line(&mut self, line: &str, events: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.dispatch(events);
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data_lines.push(value.to_string());
        }
    }

    fn dispatch(&mut self, events: &mut Vec<SseEvent>) {
        if self.data_lines.is_empty() {
            return;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();

        if data.trim() == DONE_MARKER {
            events.push(SseEvent::Done);
        } else {
            events.push(SseEvent::Data(data));
        }
    }
}

/// Extract the text delta (`choices[0].delta.content`) from one event payload.
///
/// Events without content (role announcements, finish markers) yield `None`.
pub(crate) fn parse_delta(data: &str) -> Result<Option<String>> {
    let value: Value = serde_json::from_str(data)
        .map_err(|e| SpecterError::generation(format!("malformed stream chunk: {e}")))?;

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(SpecterError::generation(message));
    }

    Ok(value
        .pointer("/choices/0/delta/content")
        .and_then(Value::as_str)
        .map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_events_across_chunk_boundaries() {
        let mut decoder = SseDecoder::new();
        let mut events = decoder.push(b"data: {\"a\":");
        assert!(events.is_empty());
        events.extend(decoder.push(b"1}\n\ndata: [DO"));
        events.extend(decoder.push(b"NE]\n\n"));

        assert_eq!(
            events,
            vec![SseEvent::Data("{\"a\":1}".into()), SseEvent::Done]
        );
    }

    #[test]
    fn multibyte_characters_survive_splits() {
        let payload = "data: {\"choices\":[{\"delta\":{\"content\":\"§ 1983\"}}]}\n\n";
        let bytes = payload.as_bytes();
        let split = payload.find('§').unwrap() + 1; // inside the two-byte sequence

        let mut decoder = SseDecoder::new();
        let mut events = decoder.push(&bytes[..split]);
        events.extend(decoder.push(&bytes[split..]));

        let SseEvent::Data(data) = &events[0] else {
            panic!("expected data event");
        };
        assert_eq!(parse_delta(data).unwrap().as_deref(), Some("§ 1983"));
    }

    #[test]
    fn comments_and_crlf_are_tolerated() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\r\nevent: message\r\ndata: x\r\n\r\n");
        assert_eq!(events, vec![SseEvent::Data("x".into())]);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish(), vec![SseEvent::Data("tail".into())]);
    }

    #[test]
    fn role_only_chunks_have_no_delta() {
        let data = r#"{"choices":[{"delta":{"role":"assistant"}}]}"#;
        assert!(parse_delta(data).unwrap().is_none());
    }

    #[test]
    fn error_chunks_become_generation_errors() {
        let err = parse_delta(r#"{"error":{"message":"model overloaded"}}"#).unwrap_err();
        assert!(err.to_string().contains("model overloaded"));
        assert!(parse_delta("not json").is_err());
    }
}
