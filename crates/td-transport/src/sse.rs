//! Incremental Server-Sent-Events parser
//!
//! Feed raw body chunks in, get complete events out. An event ends at an
//! empty line; `event:` defaults to `message` when absent, later `data:`
//! lines within one event replace earlier ones.

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    pub event: String,
    pub data: String,
}

#[derive(Default)]
pub struct SseParser {
    buffer: String,
    event: String,
    data: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume a chunk of the body, returning every event completed by it.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut events = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\r', '\n']);

            if line.is_empty() {
                if let Some(event) = self.take_event() {
                    events.push(event);
                }
                continue;
            }

            if let Some(rest) = line.strip_prefix("event:") {
                self.event = rest.trim().to_string();
            } else if let Some(rest) = line.strip_prefix("data:") {
                self.data = rest.trim().to_string();
            }
            // comment lines (": keep-alive") and unknown fields are skipped
        }
        events
    }

    /// Flush a trailing event when the stream ends without a final blank
    /// line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        self.buffer.clear();
        self.take_event()
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if self.data.is_empty() {
            self.event.clear();
            return None;
        }
        let event = SseEvent {
            event: if self.event.is_empty() {
                "message".to_string()
            } else {
                std::mem::take(&mut self.event)
            },
            data: std::mem::take(&mut self.data),
        };
        self.event.clear();
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: {\"x\":1}\n\n");
        assert_eq!(
            events,
            vec![SseEvent {
                event: "message".into(),
                data: "{\"x\":1}".into()
            }]
        );
    }

    #[test]
    fn test_named_event() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"event: endpoint\ndata: /messages?id=1\n\n");
        assert_eq!(events[0].event, "endpoint");
        assert_eq!(events[0].data, "/messages?id=1");
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: par").is_empty());
        assert!(parser.feed(b"tial\n").is_empty());
        let events = parser.feed(b"\n");
        assert_eq!(events[0].data, "partial");
    }

    #[test]
    fn test_multiple_events_in_one_chunk() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: a\n\ndata: b\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "a");
        assert_eq!(events[1].data, "b");
    }

    #[test]
    fn test_comment_and_crlf_lines() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": keep-alive\r\ndata: x\r\n\r\n");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data, "x");
    }

    #[test]
    fn test_finish_flushes_pending() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: tail\n").is_empty());
        let event = parser.finish().unwrap();
        assert_eq!(event.data, "tail");
        assert!(parser.finish().is_none());
    }

    #[test]
    fn test_empty_event_dropped() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"event: noop\n\n").is_empty());
    }
}
