//! Server-sent events line parser.
//!
//! Fed raw body chunks as they arrive; yields complete events. Handles
//! `data` (multi-line), `event`, `id`, `retry` and `:` comments, and both
//! `\n` and `\r\n` line endings. Chunks may split lines or UTF-8 sequences.

use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
    pub id: Option<String>,
}

#[derive(Debug, Default)]
pub struct SseParser {
    buf: Vec<u8>,
    data: Vec<String>,
    event: Option<String>,
    id: Option<String>,
    retry: Option<Duration>,
}

impl SseParser {
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buf.extend_from_slice(chunk);

        let mut out = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if let Some(event) = self.line(&String::from_utf8_lossy(&line)) {
                out.push(event);
            }
        }
        out
    }

    /// Reconnection delay announced by the server, if any.
    pub fn retry(&self) -> Option<Duration> {
        self.retry
    }

    fn line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.dispatch();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            "retry" => {
                if let Ok(ms) = value.trim().parse::<u64>() {
                    self.retry = Some(Duration::from_millis(ms));
                }
            }
            _ => {}
        }
        None
    }

    fn dispatch(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event,
            data,
            id: self.id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_events() {
        let mut parser = SseParser::default();
        let events = parser.feed(b": keep-alive\ndata: {\"a\":1}\n\nevent: note\ndata: x\n\n");
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].data, "{\"a\":1}");
        assert_eq!(events[0].event, None);
        assert_eq!(events[1].event.as_deref(), Some("note"));
    }

    #[test]
    fn test_split_chunks_and_crlf() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"data: hel").is_empty());
        assert!(parser.feed(b"lo\r\ndata: world\r\n").is_empty());
        let events = parser.feed(b"\r\n");
        assert_eq!(events[0].data, "hello\nworld");
    }

    #[test]
    fn test_split_utf8_sequence() {
        let mut parser = SseParser::default();
        let bytes = "data: héllo\n\n".as_bytes();
        let (a, b) = bytes.split_at(8);
        assert!(parser.feed(a).is_empty());
        assert_eq!(parser.feed(b)[0].data, "héllo");
    }

    #[test]
    fn test_retry_and_id() {
        let mut parser = SseParser::default();
        let events = parser.feed(b"retry: 2500\nid: 7\ndata: x\n\nretry: nope\n");
        assert_eq!(parser.retry(), Some(Duration::from_millis(2500)));
        assert_eq!(events[0].id.as_deref(), Some("7"));
    }

    #[test]
    fn test_blank_line_without_data_dispatches_nothing() {
        let mut parser = SseParser::default();
        assert!(parser.feed(b"event: ping\n\n").is_empty());
    }
}
