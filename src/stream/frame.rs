use axum::response::sse::Event;

/// Event name used when a frame is built with an empty or unusable name.
pub const DEFAULT_EVENT: &str = "message";

/// Data sent for an empty payload. A frame without a `data:` field is never
/// dispatched by an EventSource, so an empty payload still carries one.
const EMPTY_DATA: &str = " ";

/// One named, payload-bearing unit of the push protocol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub event: String,
    pub data: String,
}

impl Frame {
    pub fn new(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            data: data.into(),
        }
    }

    /// Convert into an SSE event for the response body.
    ///
    /// CR and CRLF in the payload are normalized to LF before axum splits it
    /// into one `data:` field per line, so a line break can never produce the
    /// blank line that ends a frame.
    pub fn into_event(self) -> Event {
        let data = normalize_line_breaks(&self.data);
        let data = if data.is_empty() { EMPTY_DATA } else { data.as_str() };
        Event::default()
            .event(sanitize_event_name(&self.event))
            .data(data)
    }
}

/// Strip control characters; an empty result falls back to [`DEFAULT_EVENT`].
fn sanitize_event_name(name: &str) -> String {
    let cleaned: String = name.chars().filter(|c| !c.is_control()).collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        DEFAULT_EVENT.to_string()
    } else {
        cleaned.to_string()
    }
}

fn normalize_line_breaks(data: &str) -> String {
    data.replace("\r\n", "\n").replace('\r', "\n")
}

/// Parse a captured event stream back into frames.
///
/// Understands the `event:`/`data:` fields this server writes and skips
/// comment-only blocks such as keep-alives.
pub fn parse_frames(raw: &str) -> Vec<Frame> {
    let mut frames = Vec::new();
    for block in raw.split("\n\n") {
        let mut event = None;
        let mut data: Vec<&str> = Vec::new();
        for line in block.split('\n') {
            if let Some(name) = line.strip_prefix("event: ") {
                event = Some(name.to_string());
            } else if let Some(value) = line.strip_prefix("data: ") {
                data.push(value);
            }
        }
        if event.is_none() && data.is_empty() {
            continue;
        }
        frames.push(Frame::new(
            event.unwrap_or_else(|| DEFAULT_EVENT.to_string()),
            data.join("\n"),
        ));
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::response::IntoResponse;
    use axum::response::sse::Sse;
    use http_body_util::BodyExt;
    use std::convert::Infallible;

    async fn wire(frames: Vec<Frame>) -> String {
        let events = frames.into_iter().map(|f| Ok::<_, Infallible>(f.into_event()));
        let body = Sse::new(futures::stream::iter(events))
            .into_response()
            .into_body();
        let bytes = body.collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_single_line() {
        let out = wire(vec![Frame::new("update", "<p>Hello</p>")]).await;
        assert_eq!(out, "event: update\ndata: <p>Hello</p>\n\n");
    }

    #[tokio::test]
    async fn test_multiline_payload_never_terminates_early() {
        let out = wire(vec![Frame::new("update", "line one\n\nline three")]).await;
        assert_eq!(
            out,
            "event: update\ndata: line one\ndata: \ndata: line three\n\n"
        );
        // The only blank line is the terminator.
        assert_eq!(out.matches("\n\n").count(), 1);
    }

    #[tokio::test]
    async fn test_carriage_returns_normalized() {
        let out = wire(vec![Frame::new("message", "a\r\nb\rc")]).await;
        assert_eq!(out, "event: message\ndata: a\ndata: b\ndata: c\n\n");
    }

    #[tokio::test]
    async fn test_empty_payload_keeps_data_field() {
        let out = wire(vec![Frame::new("complete", "")]).await;
        assert_eq!(out, "event: complete\ndata:  \n\n");
    }

    #[tokio::test]
    async fn test_event_name_control_characters_removed() {
        let out = wire(vec![Frame::new("sta\ntus\r", "x")]).await;
        assert_eq!(out, "event: status\ndata: x\n\n");

        let out = wire(vec![Frame::new("\n", "x")]).await;
        assert!(out.starts_with("event: message\n"));
    }

    #[tokio::test]
    async fn test_concatenated_frames_parse_back() {
        let frames = vec![
            Frame::new("connected", "<div>hi</div>"),
            Frame::new("update", "two\nlines"),
            Frame::new("complete", "done"),
        ];
        assert_eq!(parse_frames(&wire(frames.clone()).await), frames);
    }

    #[test]
    fn test_parse_skips_keep_alive_comments() {
        let raw = ":\n\nevent: update\ndata: a\n\n:\n\n";
        assert_eq!(parse_frames(raw), vec![Frame::new("update", "a")]);
    }
}
