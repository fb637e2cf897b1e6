//! Multi-step generation with host-side tool calls

use async_stream::stream;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;

use crate::domain::llm::{ChatMessage, ChatRequest, ContentPart, FinishReason, MessageRole, Usage};
use crate::domain::stream::StreamChunk;
use crate::domain::tool::{ToolCall, ToolCallContext, ToolSet};
use crate::domain::DomainError;

/// Upper bound on model round trips per call
pub const MAX_STEPS: usize = 20;

/// Canonical events from one vendor step
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk, DomainError>> + Send>>;

/// One vendor call producing canonical chunks.
///
/// Tool calls must arrive as complete `tool-call` chunks. Tools the vendor
/// runs itself may emit their own `tool-result` chunks.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn step(&self, request: &ChatRequest) -> Result<ChunkStream, DomainError>;
}

/// Drive the model until it stops asking for tools, or [`MAX_STEPS`] is reached.
///
/// Chunks are forwarded as they arrive. Calls to host tools are dispatched in
/// arrival order once the step ends, each yielding `tool-call` then
/// `tool-result`. Cancelling `ctx.signal` drops the upstream stream and ends
/// this one without an error.
pub fn run_tool_loop(
    backend: Arc<dyn ChatBackend>,
    mut request: ChatRequest,
    tools: ToolSet,
    ctx: ToolCallContext,
) -> ChunkStream {
    let signal = ctx.signal.clone();

    Box::pin(stream! {
        let mut usage: Option<Usage> = None;

        for step in 0..MAX_STEPS {
            let upstream = tokio::select! {
                biased;
                _ = signal.cancelled() => {
                    debug!(step, "Generation cancelled before step");
                    return;
                }
                result = backend.step(&request) => result,
            };
            let mut upstream = match upstream {
                Ok(upstream) => upstream,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };

            let mut text = String::new();
            let mut calls: Vec<ToolCall> = Vec::new();
            let mut finish = FinishReason::Stop;

            loop {
                let next = tokio::select! {
                    biased;
                    _ = signal.cancelled() => {
                        debug!(step, "Generation cancelled mid-stream");
                        return;
                    }
                    next = upstream.next() => next,
                };

                match next {
                    None => break,
                    Some(Err(e)) => {
                        yield Err(e);
                        return;
                    }
                    Some(Ok(StreamChunk::ToolCall { tool_call_id, tool_name, args }))
                        if !tools.is_native(&tool_name) =>
                    {
                        calls.push(ToolCall::new(tool_call_id, tool_name, args));
                    }
                    Some(Ok(StreamChunk::Finish { finish_reason, usage: step_usage })) => {
                        finish = finish_reason;
                        if let Some(step_usage) = step_usage {
                            usage.get_or_insert_with(Usage::default).add(step_usage);
                        }
                    }
                    Some(Ok(chunk)) => {
                        if let StreamChunk::TextDelta { text_delta } = &chunk {
                            text.push_str(text_delta);
                        }
                        yield Ok(chunk);
                    }
                }
            }

            if calls.is_empty() {
                yield Ok(StreamChunk::Finish { finish_reason: finish, usage });
                return;
            }

            let mut assistant = Vec::new();
            if !text.is_empty() {
                assistant.push(ContentPart::text(text));
            }
            let mut results = Vec::with_capacity(calls.len());

            for call in calls {
                yield Ok(StreamChunk::tool_call(call.id.clone(), call.name.clone(), call.args.clone()));

                let result = tokio::select! {
                    biased;
                    _ = signal.cancelled() => {
                        debug!(step, tool = %call.name, "Generation cancelled during tool call");
                        return;
                    }
                    result = tools.dispatch(&call, &ctx) => result,
                };

                yield Ok(StreamChunk::tool_result(
                    call.id.clone(),
                    call.name.clone(),
                    call.args.clone(),
                    result.clone(),
                ));

                assistant.push(ContentPart::ToolCall {
                    id: call.id.clone(),
                    name: call.name.clone(),
                    args: call.args,
                });
                results.push(ContentPart::ToolResult {
                    id: call.id,
                    name: call.name,
                    result,
                });
            }

            request.messages.push(ChatMessage::new(MessageRole::Assistant, assistant));
            request.messages.push(ChatMessage::new(MessageRole::Tool, results));
        }

        debug!(max_steps = MAX_STEPS, "Tool loop reached its step limit");
        yield Ok(StreamChunk::Finish { finish_reason: FinishReason::ToolCalls, usage });
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tool::{CopilotTool, ToolError};
    use futures::stream;
    use serde_json::{json, Value};
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    /// Replays scripted steps and records each request it was sent
    struct ScriptedBackend {
        steps: Mutex<Vec<Vec<StreamChunk>>>,
        requests: Mutex<Vec<ChatRequest>>,
    }

    impl ScriptedBackend {
        fn new(mut steps: Vec<Vec<StreamChunk>>) -> Arc<Self> {
            steps.reverse();
            Arc::new(Self {
                steps: Mutex::new(steps),
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptedBackend {
        async fn step(&self, request: &ChatRequest) -> Result<ChunkStream, DomainError> {
            self.requests.lock().unwrap().push(request.clone());
            let chunks = self.steps.lock().unwrap().pop().unwrap_or_default();
            Ok(Box::pin(stream::iter(chunks.into_iter().map(Ok))))
        }
    }

    struct Upper;

    #[async_trait]
    impl CopilotTool for Upper {
        fn name(&self) -> &'static str {
            "upper"
        }

        fn description(&self) -> &'static str {
            "Upper-case a word"
        }

        fn parameters(&self) -> Value {
            json!({"type": "object", "properties": {"word": {"type": "string"}}})
        }

        async fn execute(&self, args: Value, _ctx: &ToolCallContext) -> Result<Value, ToolError> {
            let word = args["word"].as_str().unwrap_or_default();
            Ok(json!(word.to_uppercase()))
        }
    }

    fn tools() -> ToolSet {
        let mut set = ToolSet::new();
        set.insert(Arc::new(Upper));
        set.insert_native("web_search", json!({"type": "web_search_20250305"}));
        set
    }

    async fn collect(stream: ChunkStream) -> Vec<StreamChunk> {
        stream.map(|c| c.unwrap()).collect().await
    }

    #[tokio::test]
    async fn test_tool_call_then_answer() {
        let backend = ScriptedBackend::new(vec![
            vec![
                StreamChunk::text("Let me check. "),
                StreamChunk::tool_call("c1", "upper", json!({"word": "hi"})),
                StreamChunk::finish(FinishReason::ToolCalls),
            ],
            vec![StreamChunk::text("HI"), StreamChunk::finish(FinishReason::Stop)],
        ]);

        let chunks = collect(run_tool_loop(
            backend.clone(),
            ChatRequest::default(),
            tools(),
            ToolCallContext::default(),
        ))
        .await;

        assert_eq!(
            chunks,
            vec![
                StreamChunk::text("Let me check. "),
                StreamChunk::tool_call("c1", "upper", json!({"word": "hi"})),
                StreamChunk::tool_result("c1", "upper", json!({"word": "hi"}), json!("HI")),
                StreamChunk::text("HI"),
                StreamChunk::finish(FinishReason::Stop),
            ]
        );

        let requests = backend.requests.lock().unwrap();
        assert_eq!(requests.len(), 2);
        let second = &requests[1].messages;
        assert_eq!(second[0].role, MessageRole::Assistant);
        assert_eq!(second[0].text(), "Let me check. ");
        assert_eq!(second[1].role, MessageRole::Tool);
        assert!(matches!(
            &second[1].content[0],
            ContentPart::ToolResult { id, result, .. } if id == "c1" && result == &json!("HI")
        ));
    }

    #[tokio::test]
    async fn test_native_tool_events_pass_through() {
        let backend = ScriptedBackend::new(vec![vec![
            StreamChunk::tool_call("s1", "web_search", json!({"query": "rust"})),
            StreamChunk::tool_result("s1", "web_search", json!({"query": "rust"}), json!([])),
            StreamChunk::text("done"),
            StreamChunk::finish(FinishReason::Stop),
        ]]);

        let chunks = collect(run_tool_loop(
            backend.clone(),
            ChatRequest::default(),
            tools(),
            ToolCallContext::default(),
        ))
        .await;

        assert_eq!(chunks.len(), 4);
        assert_eq!(backend.requests.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_tool_yields_error_result() {
        let backend = ScriptedBackend::new(vec![
            vec![StreamChunk::tool_call("c1", "missing", json!({}))],
            vec![StreamChunk::text("sorry")],
        ]);

        let chunks = collect(run_tool_loop(
            backend,
            ChatRequest::default(),
            tools(),
            ToolCallContext::default(),
        ))
        .await;

        assert!(matches!(
            &chunks[1],
            StreamChunk::ToolResult { result, .. } if result["type"] == "error"
        ));
        assert_eq!(chunks[2], StreamChunk::text("sorry"));
    }

    #[tokio::test]
    async fn test_step_limit() {
        let steps = (0..MAX_STEPS + 5)
            .map(|i| vec![StreamChunk::tool_call(format!("c{}", i), "upper", json!({"word": "a"}))])
            .collect();
        let backend = ScriptedBackend::new(steps);

        let chunks = collect(run_tool_loop(
            backend.clone(),
            ChatRequest::default(),
            tools(),
            ToolCallContext::default(),
        ))
        .await;

        assert_eq!(backend.requests.lock().unwrap().len(), MAX_STEPS);
        assert_eq!(chunks.last(), Some(&StreamChunk::finish(FinishReason::ToolCalls)));
    }

    #[tokio::test]
    async fn test_cancelled_before_start_yields_nothing() {
        let backend = ScriptedBackend::new(vec![vec![StreamChunk::text("never")]]);
        let signal = CancellationToken::new();
        signal.cancel();
        let ctx = ToolCallContext {
            signal,
            ..Default::default()
        };

        let chunks = collect(run_tool_loop(backend, ChatRequest::default(), tools(), ctx)).await;
        assert!(chunks.is_empty());
    }

    #[tokio::test]
    async fn test_cancel_mid_stream_keeps_prefix() {
        let signal = CancellationToken::new();
        let ctx = ToolCallContext {
            signal: signal.clone(),
            ..Default::default()
        };
        let backend = ScriptedBackend::new(vec![vec![
            StreamChunk::text("a"),
            StreamChunk::text("b"),
            StreamChunk::text("c"),
        ]]);

        let mut stream = run_tool_loop(backend, ChatRequest::default(), tools(), ctx);
        let first = stream.next().await.unwrap().unwrap();
        signal.cancel();
        let rest: Vec<_> = stream.collect().await;

        assert_eq!(first, StreamChunk::text("a"));
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn test_usage_is_summed_across_steps() {
        let backend = ScriptedBackend::new(vec![
            vec![
                StreamChunk::tool_call("c1", "upper", json!({"word": "x"})),
                StreamChunk::Finish {
                    finish_reason: FinishReason::ToolCalls,
                    usage: Some(Usage::new(10, 2)),
                },
            ],
            vec![StreamChunk::Finish {
                finish_reason: FinishReason::Stop,
                usage: Some(Usage::new(20, 3)),
            }],
        ]);

        let chunks = collect(run_tool_loop(
            backend,
            ChatRequest::default(),
            tools(),
            ToolCallContext::default(),
        ))
        .await;

        assert_eq!(
            chunks.last(),
            Some(&StreamChunk::Finish {
                finish_reason: FinishReason::Stop,
                usage: Some(Usage::new(30, 5)),
            })
        );
    }
}
