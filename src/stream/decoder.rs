// Copyright 2026 The Relayguard Project
// SPDX-License-Identifier: Apache-2.0

// Event decoder
//
// Reassembles server-sent events from byte chunks split at arbitrary
// points, then maps each event to an event unit.

use super::types::{DecodeError, DeltaEvent, EventUnit, SseEvent, DONE};
use serde_json::Value;

const EXCERPT_CHARS: usize = 120;

/// Incremental event-stream parser.
///
/// Bytes are buffered until a full line is available, so a chunk boundary
/// inside a multi-byte character or inside a field name is harmless.
#[derive(Debug, Default)]
pub struct EventDecoder {
    buf: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; returns every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !chunk.contains(&b'\n') {
            self.buf.extend_from_slice(chunk);
            return events;
        }

        let mut buf = std::mem::take(&mut self.buf);
        buf.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(pos) = buf[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            let line = &buf[start..end];
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            self.process_line(&String::from_utf8_lossy(line), &mut events);
            start = end + 1;
        }

        buf.drain(..start);
        self.buf = buf;
        events
    }

    /// Flush at end of input. A trailing line without a newline and an event
    /// without its blank-line terminator are both still delivered.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let mut events = Vec::new();
        if !self.buf.is_empty() {
            let buf = std::mem::take(&mut self.buf);
            let line = buf.strip_suffix(b"\r").unwrap_or(&buf[..]);
            self.process_line(&String::from_utf8_lossy(line), &mut events);
        }
        self.dispatch(&mut events);
        events
    }

    fn process_line(&mut self, line: &str, out: &mut Vec<SseEvent>) {
        if line.is_empty() {
            self.dispatch(out);
            return;
        }
        if line.starts_with(':') {
            return;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            // id, retry and unknown fields carry nothing we relay
            _ => {}
        }
    }

    fn dispatch(&mut self, out: &mut Vec<SseEvent>) {
        if self.data.is_empty() {
            self.event = None;
            return;
        }
        out.push(SseEvent {
            event: self.event.take(),
            data: self.data.join("\n"),
        });
        self.data.clear();
    }
}

/// Map a decoded event to an event unit.
///
/// `[DONE]` is terminal; JSON is a delta; anything else is malformed and
/// should be dropped by the caller.
pub fn decode_unit(event: &SseEvent) -> Result<EventUnit, DecodeError> {
    let payload = event.data.trim();
    if payload == DONE {
        return Ok(EventUnit::Terminal);
    }
    match serde_json::from_str::<Value>(payload) {
        Ok(envelope) => Ok(EventUnit::Delta(DeltaEvent::new(envelope, event.data.clone()))),
        Err(e) => Err(DecodeError::Malformed {
            excerpt: payload.chars().take(EXCERPT_CHARS).collect(),
            reason: e.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_of(events: &[SseEvent]) -> Vec<&str> {
        events.iter().map(|e| e.data.as_str()).collect()
    }

    #[test]
    fn whole_events_in_one_chunk() {
        let mut d = EventDecoder::new();
        let events = d.feed(b"data: {\"a\":1}\n\ndata: [DONE]\n\n");
        assert_eq!(data_of(&events), vec!["{\"a\":1}", "[DONE]"]);
    }

    #[test]
    fn data_line_split_across_chunks() {
        let mut d = EventDecoder::new();
        assert!(d.feed(b"da").is_empty());
        assert!(d.feed(b"ta: {\"choices\":").is_empty());
        assert!(d.feed(b"[]}\n").is_empty());
        let events = d.feed(b"\n");
        assert_eq!(data_of(&events), vec!["{\"choices\":[]}"]);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let line = "data: {\"c\":\"你好。\"}\n\n".as_bytes();
        // Split inside the three-byte encoding of the first character.
        let split = line.iter().position(|b| *b == 0xE4).unwrap() + 1;

        let mut d = EventDecoder::new();
        assert!(d.feed(&line[..split]).is_empty());
        let events = d.feed(&line[split..]);
        assert_eq!(data_of(&events), vec!["{\"c\":\"你好。\"}"]);
    }

    #[test]
    fn byte_at_a_time() {
        let input = b"event: message\ndata: one\r\n\r\n: keep-alive\n\ndata: two\n\n";
        let mut d = EventDecoder::new();
        let mut events = Vec::new();
        for b in input {
            events.extend(d.feed(std::slice::from_ref(b)));
        }
        assert_eq!(data_of(&events), vec!["one", "two"]);
        assert_eq!(events[0].event.as_deref(), Some("message"));
        assert_eq!(events[1].event, None);
    }

    #[test]
    fn multiple_data_lines_joined() {
        let mut d = EventDecoder::new();
        let events = d.feed(b"data: a\ndata:b\nid: 7\nretry: 10\n\n");
        assert_eq!(data_of(&events), vec!["a\nb"]);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut d = EventDecoder::new();
        assert!(d.feed(b"data: [DONE]").is_empty());
        let events = d.finish();
        assert_eq!(data_of(&events), vec!["[DONE]"]);
        assert!(d.finish().is_empty());
    }

    #[test]
    fn blank_lines_without_data_dispatch_nothing() {
        let mut d = EventDecoder::new();
        assert!(d.feed(b"\n\n\nevent: ping\n\n").is_empty());
    }

    #[test]
    fn decode_done_is_terminal() {
        let event = SseEvent {
            event: None,
            data: "[DONE]".into(),
        };
        assert_eq!(decode_unit(&event).unwrap(), EventUnit::Terminal);
    }

    #[test]
    fn decode_json_is_delta() {
        let raw = r#"{"choices":[{"delta":{"content":"你好。"}}]}"#;
        let event = SseEvent {
            event: None,
            data: raw.into(),
        };
        match decode_unit(&event).unwrap() {
            EventUnit::Delta(delta) => {
                assert_eq!(delta.raw, raw);
                assert_eq!(delta.fragment(), "你好。");
            }
            other => panic!("expected delta, got {other:?}"),
        }
    }

    #[test]
    fn decode_missing_fragment_reads_empty() {
        let event = SseEvent {
            event: None,
            data: r#"{"choices":[{"delta":{},"finish_reason":"stop"}]}"#.into(),
        };
        let EventUnit::Delta(delta) = decode_unit(&event).unwrap() else {
            panic!("expected delta");
        };
        assert_eq!(delta.fragment, None);
        assert_eq!(delta.fragment(), "");
    }

    #[test]
    fn decode_garbage_is_malformed() {
        let event = SseEvent {
            event: None,
            data: "not json at all".into(),
        };
        let err = decode_unit(&event).unwrap_err();
        assert!(err.to_string().contains("not json at all"));
    }
}
