use serde_json::Value;
use tracing::debug;

use crate::types::{Source, ToolResultRecord};

/// One complete wire event extracted from a `text/event-stream` body.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    /// Payload of a `data: ` line, JSON not yet interpreted.
    Data(String),
    /// The literal `data: [DONE]` terminator.
    Done,
}

/// Logical stream frame after JSON interpretation.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    ToolResult(ToolResultRecord),
    Sources(Vec<Source>),
    Delta(String),
}

/// Push-based tokenizer over an append-only byte buffer. Network chunk
/// boundaries carry no meaning: `push` yields only complete lines and keeps
/// any trailing partial line buffered until more bytes arrive, so feeding the
/// same bytes in any split produces the same events.
#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(bytes);

        let mut events = Vec::new();
        while let Some(newline) = self.buf.iter().position(|b| *b == b'\n') {
            let line_bytes: Vec<u8> = self.buf.drain(..=newline).collect();
            let line = match std::str::from_utf8(&line_bytes[..newline]) {
                Ok(line) => line.trim_end_matches('\r'),
                Err(_) => {
                    debug!("Skipping non-UTF-8 stream line");
                    continue;
                }
            };

            let payload = if let Some(payload) = line.strip_prefix("data: ") {
                payload
            } else if let Some(payload) = line.strip_prefix("data:") {
                payload
            } else {
                // Blank separators, comments, `event:` lines.
                continue;
            };

            if payload.trim() == "[DONE]" {
                events.push(SseEvent::Done);
            } else if !payload.is_empty() {
                events.push(SseEvent::Data(payload.to_string()));
            }
        }
        events
    }
}

/// Interprets one `data:` payload. Recognizes the `tool_result` and `sources`
/// side channels plus the two content delta shapes (bare `content` and
/// OpenAI-style `choices[0].delta.content`). Anything else returns `None` and
/// is skipped by callers.
pub fn parse_frame(payload: &str) -> Option<StreamFrame> {
    let value: Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => {
            debug!("Skipping malformed stream frame: {}", e);
            return None;
        }
    };

    match value.get("type").and_then(Value::as_str) {
        Some("tool_result") => {
            let tool = value.get("tool")?.as_str()?.to_string();
            let result = value.get("result").cloned().unwrap_or(Value::Null);
            Some(StreamFrame::ToolResult(ToolResultRecord { tool, result }))
        }
        Some("sources") => {
            let sources = serde_json::from_value(value.get("sources")?.clone()).ok()?;
            Some(StreamFrame::Sources(sources))
        }
        _ => {
            if let Some(content) = value.get("content").and_then(Value::as_str) {
                return Some(StreamFrame::Delta(content.to_string()));
            }
            let delta = value
                .get("choices")?
                .get(0)?
                .get("delta")?
                .get("content")?
                .as_str()?;
            Some(StreamFrame::Delta(delta.to_string()))
        }
    }
}

/// Formats one frame for the wire: `data: ` prefix, newline-delimited.
pub fn encode_data_line(value: &Value) -> bytes::Bytes {
    bytes::Bytes::from(format!("data: {}\n\n", value))
}

pub fn done_line() -> bytes::Bytes {
    bytes::Bytes::from_static(b"data: [DONE]\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const STREAM: &str = "data: {\"choices\":[{\"delta\":{\"content\":\"CS101 is\"}}]}\n\ndata: {\"choices\":[{\"delta\":{\"content\":\" an intro course.\"}}]}\n\ndata: [DONE]\n\n";

    fn collect_text(events: &[SseEvent]) -> String {
        events
            .iter()
            .filter_map(|event| match event {
                SseEvent::Data(payload) => match parse_frame(payload) {
                    Some(StreamFrame::Delta(delta)) => Some(delta.clone()),
                    _ => None,
                },
                SseEvent::Done => None,
            })
            .collect()
    }

    #[test]
    fn whole_stream_in_one_push() {
        let mut parser = SseParser::new();
        let events = parser.push(STREAM.as_bytes());

        assert_eq!(collect_text(&events), "CS101 is an intro course.");
        assert_eq!(events.last(), Some(&SseEvent::Done));
    }

    #[test]
    fn one_byte_chunks_yield_identical_events() {
        let mut whole = SseParser::new();
        let whole_events = whole.push(STREAM.as_bytes());

        let mut split = SseParser::new();
        let mut split_events = Vec::new();
        for byte in STREAM.as_bytes() {
            split_events.extend(split.push(std::slice::from_ref(byte)));
        }

        assert_eq!(whole_events, split_events);
        assert_eq!(collect_text(&split_events), "CS101 is an intro course.");
    }

    #[test]
    fn partial_line_is_rebuffered_not_dropped() {
        let mut parser = SseParser::new();
        assert!(parser.push(b"data: {\"content\":\"hel").is_empty());
        let events = parser.push(b"lo\"}\n");

        assert_eq!(events.len(), 1);
        assert_eq!(
            parse_frame(match &events[0] {
                SseEvent::Data(p) => p,
                _ => panic!("expected data event"),
            }),
            Some(StreamFrame::Delta("hello".to_string()))
        );
    }

    #[test]
    fn crlf_lines_are_tolerated() {
        let mut parser = SseParser::new();
        let events = parser.push(b"data: {\"content\":\"hi\"}\r\ndata: [DONE]\r\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], SseEvent::Done);
    }

    #[test]
    fn malformed_payload_is_skipped() {
        assert_eq!(parse_frame("{not json"), None);
        assert_eq!(parse_frame("{\"unrelated\":true}"), None);
    }

    #[test]
    fn non_data_lines_are_ignored() {
        let mut parser = SseParser::new();
        let events = parser.push(b"event: ping\n: comment\n\ndata: {\"content\":\"x\"}\n");
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn tool_result_frame_parses() {
        let frame = parse_frame(
            "{\"type\":\"tool_result\",\"tool\":\"course_lookup\",\"result\":{\"code\":\"CS101\"}}",
        );
        assert_eq!(
            frame,
            Some(StreamFrame::ToolResult(ToolResultRecord {
                tool: "course_lookup".to_string(),
                result: json!({"code": "CS101"}),
            }))
        );
    }

    #[test]
    fn sources_frame_parses() {
        let frame = parse_frame(
            "{\"type\":\"sources\",\"sources\":[{\"title\":\"CS101\",\"content\":\"intro\",\"relevance\":0.8}]}",
        );
        match frame {
            Some(StreamFrame::Sources(sources)) => {
                assert_eq!(sources.len(), 1);
                assert_eq!(sources[0].title, "CS101");
            }
            other => panic!("unexpected frame: {:?}", other),
        }
    }

    #[test]
    fn multibyte_content_survives_byte_splits() {
        let stream = "data: {\"content\":\"héllo wörld\"}\n".as_bytes();
        let mut parser = SseParser::new();
        let mut events = Vec::new();
        for byte in stream {
            events.extend(parser.push(std::slice::from_ref(byte)));
        }
        assert_eq!(collect_text(&events), "héllo wörld");
    }
}
