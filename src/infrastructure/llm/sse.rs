//! Server-sent event decoding for vendor streams

use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use std::pin::Pin;

use super::http_client::ByteStream;
use crate::domain::DomainError;

const DONE_MARKER: &str = "[DONE]";

/// One decoded event; `event` is empty when the server omits it
#[derive(Debug, Clone, PartialEq)]
pub struct SseMessage {
    pub event: String,
    pub data: String,
}

impl SseMessage {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, DomainError> {
        serde_json::from_str(&self.data).map_err(|e| {
            DomainError::stream(format!("Malformed stream chunk: {} ({:.120})", e, self.data))
        })
    }
}

pub type SseStream = Pin<Box<dyn Stream<Item = Result<SseMessage, DomainError>> + Send>>;

/// Decode an SSE body, stopping at the `[DONE]` sentinel
pub fn sse_messages(body: ByteStream) -> SseStream {
    let stream = body
        .eventsource()
        .map(|item| {
            item.map(|event| SseMessage {
                event: event.event,
                data: event.data,
            })
            .map_err(|e| DomainError::stream(e.to_string()))
        })
        .take_while(|item| {
            let done = matches!(item, Ok(message) if message.data.trim() == DONE_MARKER);
            futures::future::ready(!done)
        })
        .filter(|item| {
            let keep = !matches!(item, Ok(message) if message.data.trim().is_empty());
            futures::future::ready(keep)
        });

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    fn body(chunks: &[&'static str]) -> ByteStream {
        Box::pin(stream::iter(
            chunks
                .iter()
                .map(|c| Ok(Bytes::from_static(c.as_bytes())))
                .collect::<Vec<_>>(),
        ))
    }

    #[tokio::test]
    async fn test_events_split_across_chunks() {
        let messages: Vec<SseMessage> = sse_messages(body(&[
            "event: message_start\nda",
            "ta: {\"a\":1}\n\ndata: {\"b\"",
            ":2}\n\n: keep-alive\n\ndata: [DONE]\n\ndata: {\"late\":true}\n\n",
        ]))
        .map(|m| m.unwrap())
        .collect()
        .await;

        let data: Vec<&str> = messages.iter().map(|m| m.data.as_str()).collect();
        assert_eq!(data, vec!["{\"a\":1}", "{\"b\":2}"]);
        assert_eq!(messages[0].event, "message_start");
    }

    #[tokio::test]
    async fn test_malformed_json_is_a_stream_error() {
        let message = SseMessage {
            event: String::new(),
            data: "{oops".into(),
        };
        let error = message.json::<serde_json::Value>().unwrap_err();
        assert!(matches!(error, DomainError::Stream { .. }));
    }
}
