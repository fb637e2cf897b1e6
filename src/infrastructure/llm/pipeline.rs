//! Shared steps between a vendor chunk stream and the provider surface

use async_stream::stream;
use futures::StreamExt;
use tracing::debug;

use super::tool_loop::ChunkStream;
use crate::domain::llm::{
    ChatOptions, CopilotProvider, ModelSelectionQuery, ObjectStream, OutputModality,
    ProviderModel, TextStream,
};
use crate::domain::prompt::{check_params, PromptMessage};
use crate::domain::stream::{CitationParser, StreamChunk, StreamObjectParser, TextStreamParser};
use crate::domain::DomainError;

/// Resolve the model for an output type and validate the prompt against it
pub fn prepare_model<P: CopilotProvider + ?Sized>(
    provider: &P,
    query: &ModelSelectionQuery,
    output: OutputModality,
    messages: &[PromptMessage],
    options: &ChatOptions,
) -> Result<ProviderModel, DomainError> {
    let query = query.clone().with_output(output);
    let model = provider.select_model(&query)?.clone();
    check_params(&model, messages, options)?;

    debug!(provider = %provider.provider_type(), model = %model.id, output = ?output, "Selected model");
    Ok(model)
}

/// Render chunks as display text with citations and edit footnotes
pub fn into_text_stream(chunks: ChunkStream) -> TextStream {
    into_cited_text_stream(chunks, CitationParser::new())
}

/// Like [`into_text_stream`], with a citation parser that already holds sources
pub fn into_cited_text_stream(mut chunks: ChunkStream, mut citations: CitationParser) -> TextStream {
    Box::pin(stream! {
        let mut parser = TextStreamParser::new();

        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let rendered = match &chunk {
                StreamChunk::TextDelta { .. } => parser.parse(&chunk).map(|text| citations.parse(&text)),
                StreamChunk::Finish { .. } => {
                    let footnotes = parser.end();
                    let mut tail = citations.end();
                    if !footnotes.is_empty() {
                        tail.push('\n');
                        tail.push_str(&footnotes);
                    }
                    Ok(tail)
                }
                _ => {
                    // answer text held for a possible marker goes out first
                    let pending = citations.flush();
                    if !pending.is_empty() {
                        yield Ok(pending);
                    }
                    parser.parse(&chunk)
                }
            };

            match rendered {
                Ok(text) if text.is_empty() => {}
                Ok(text) => yield Ok(text),
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    })
}

/// Structured events, one per displayable chunk
pub fn into_object_stream(mut chunks: ChunkStream) -> ObjectStream {
    Box::pin(stream! {
        let parser = StreamObjectParser::new();

        while let Some(chunk) = chunks.next().await {
            match chunk.and_then(|c| parser.parse(&c)) {
                Ok(Some(object)) => yield Ok(object),
                Ok(None) => {}
                Err(e) => {
                    yield Err(e);
                    return;
                }
            }
        }
    })
}

/// Concatenated text deltas of a whole generation
pub async fn collect_text(mut chunks: ChunkStream) -> Result<String, DomainError> {
    let mut text = String::new();
    while let Some(chunk) = chunks.next().await {
        match chunk? {
            StreamChunk::TextDelta { text_delta } => text.push_str(&text_delta),
            StreamChunk::Error { error } => return Err(DomainError::stream(error)),
            _ => {}
        }
    }
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::FinishReason;
    use crate::domain::stream::{Citation, StreamObject};
    use futures::stream;
    use serde_json::json;

    fn chunks(items: Vec<StreamChunk>) -> ChunkStream {
        Box::pin(stream::iter(items.into_iter().map(Ok)))
    }

    #[tokio::test]
    async fn test_text_stream_renders_citations_on_finish() {
        let mut citations = CitationParser::new();
        citations.push(Citation::from("https://a.test/x"));

        let text: Vec<String> = into_cited_text_stream(
            chunks(vec![
                StreamChunk::text("Rust is fast [1]"),
                StreamChunk::text("."),
                StreamChunk::finish(FinishReason::Stop),
            ]),
            citations,
        )
        .map(|t| t.unwrap())
        .collect()
        .await;

        let joined = text.concat();
        assert!(joined.starts_with("Rust is fast [^1]."));
        assert!(joined.contains("[^1]:{\"type\":\"url\",\"url\":\"https%3A%2F%2Fa.test%2Fx\"}"));
    }

    #[tokio::test]
    async fn test_buffered_text_precedes_tool_callout() {
        let mut citations = CitationParser::new();
        citations.push(Citation::from("https://a.test/x"));

        let text: Vec<String> = into_cited_text_stream(
            chunks(vec![
                StreamChunk::text("Paris is the capital [1]"),
                StreamChunk::tool_call("c1", "doc_read", json!({"doc_id": "d1"})),
                StreamChunk::text("Next."),
                StreamChunk::finish(FinishReason::Stop),
            ]),
            citations,
        )
        .map(|t| t.unwrap())
        .collect()
        .await;

        assert_eq!(text[0], "Paris is the capital ");
        assert_eq!(text[1], "[^1]");
        assert!(text[2].contains("Reading the doc \"d1\""));

        let joined = text.concat();
        let cite = joined.find("[^1]").unwrap();
        let callout = joined.find("Reading the doc").unwrap();
        let next = joined.find("Next.").unwrap();
        assert!(cite < callout && callout < next);
    }

    #[tokio::test]
    async fn test_partial_marker_is_closed_by_reasoning() {
        let text: Vec<String> = into_text_stream(chunks(vec![
            StreamChunk::text("See [1"),
            StreamChunk::reasoning("thinking"),
            StreamChunk::text("] done"),
            StreamChunk::finish(FinishReason::Stop),
        ]))
        .map(|t| t.unwrap())
        .collect()
        .await;

        assert_eq!(text[0], "See ");
        assert_eq!(text[1], "[1");
        assert!(text[2].contains("thinking"));
        assert!(text.concat().ends_with("] done"));
    }

    #[tokio::test]
    async fn test_text_stream_error_chunk_fails() {
        let items: Vec<_> = into_text_stream(chunks(vec![
            StreamChunk::text("ok"),
            StreamChunk::error("boom"),
            StreamChunk::text("never"),
        ]))
        .collect()
        .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_deref().unwrap(), "ok");
        assert_eq!(items[1].clone().unwrap_err(), DomainError::stream("boom"));
    }

    #[tokio::test]
    async fn test_object_stream_skips_finish() {
        let objects: Vec<StreamObject> = into_object_stream(chunks(vec![
            StreamChunk::reasoning("hm"),
            StreamChunk::tool_call("c1", "doc_read", json!({})),
            StreamChunk::finish(FinishReason::Stop),
        ]))
        .map(|o| o.unwrap())
        .collect()
        .await;

        assert_eq!(objects.len(), 2);
        assert!(matches!(objects[1], StreamObject::ToolCall { .. }));
    }

    #[tokio::test]
    async fn test_collect_text() {
        let text = collect_text(chunks(vec![
            StreamChunk::text("a"),
            StreamChunk::reasoning("skip"),
            StreamChunk::text("b"),
        ]))
        .await
        .unwrap();
        assert_eq!(text, "ab");
    }
}
