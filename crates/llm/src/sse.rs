//! Thin wrapper over `eventsource-stream` for reading provider SSE responses.

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use reqwest::Response;

use crate::error::LlmError;

/// One parsed `text/event-stream` event: an optional event name and the raw data payload.
#[derive(Debug, Clone)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Turns an upstream streaming HTTP response into a stream of parsed SSE events, surfacing
/// transport and framing errors as `LlmError`.
pub fn read(response: Response) -> impl Stream<Item = Result<SseEvent, LlmError>> {
    response
        .bytes_stream()
        .map(|chunk| chunk.map_err(LlmError::from))
        .eventsource()
        .map(|event| match event {
            Ok(event) => Ok(SseEvent {
                event: if event.event.is_empty() { None } else { Some(event.event) },
                data: event.data,
            }),
            Err(err) => Err(LlmError::DecodeError(err.to_string())),
        })
}

#[cfg(test)]
mod tests {
    use futures::stream;

    use super::*;

    #[tokio::test]
    async fn parses_named_and_unnamed_events() {
        let body = "event: message_start\ndata: {\"a\":1}\n\ndata: {\"b\":2}\n\n";
        let chunks = stream::iter(vec![Ok::<_, reqwest::Error>(bytes::Bytes::from(body))]);

        let events: Vec<_> = chunks
            .eventsource()
            .map(|e| e.unwrap())
            .collect::<Vec<_>>()
            .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event, "message_start");
        assert_eq!(events[0].data, r#"{"a":1}"#);
        assert_eq!(events[1].event, "");
        assert_eq!(events[1].data, r#"{"b":2}"#);
    }
}
