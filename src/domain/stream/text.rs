use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::StreamChunk;
use crate::domain::DomainError;

const CALLOUT_PREFIX: &str = "\n[!]\n";

#[derive(Debug, Clone, Serialize)]
struct DocEditFootnote {
    #[serde(rename = "type")]
    kind: &'static str,
    intent: String,
    result: String,
}

/// Renders canonical chunks as display text.
///
/// Reasoning and tool activity are rendered as a blockquote callout that is
/// opened the first time side-channel output follows plain text.
#[derive(Debug)]
pub struct TextStreamParser {
    last_kind: Option<&'static str>,
    prefix: Option<&'static str>,
    doc_edit_footnotes: Vec<DocEditFootnote>,
}

impl Default for TextStreamParser {
    fn default() -> Self {
        Self {
            last_kind: None,
            prefix: Some(CALLOUT_PREFIX),
            doc_edit_footnotes: Vec::new(),
        }
    }
}

impl TextStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render one chunk. An `error` chunk is returned as a typed failure.
    pub fn parse(&mut self, chunk: &StreamChunk) -> Result<String, DomainError> {
        let result = match chunk {
            StreamChunk::TextDelta { text_delta } => {
                if self.prefix.is_none() {
                    self.prefix = Some(CALLOUT_PREFIX);
                }
                self.add_newline(chunk.kind(), text_delta)
            }
            StreamChunk::Reasoning { text_delta } => {
                let text = self.add_prefix(text_delta);
                mark_as_callout(&text)
            }
            StreamChunk::ToolCall {
                tool_call_id,
                tool_name,
                args,
            } => {
                debug!(tool_name = %tool_name, tool_call_id = %tool_call_id, "Rendering tool call");
                let mut text = self.add_prefix("");
                text.push_str(&self.tool_call_status(tool_name, args));
                mark_as_callout(&text)
            }
            StreamChunk::ToolResult {
                tool_call_id,
                tool_name,
                args,
                result,
            } => {
                debug!(tool_name = %tool_name, tool_call_id = %tool_call_id, "Rendering tool result");
                let mut text = self.add_prefix("");
                text.push_str(&self.tool_result_status(tool_name, args, result));
                mark_as_callout(&text)
            }
            StreamChunk::Error { error } => return Err(DomainError::stream(error.clone())),
            StreamChunk::Finish { .. } => String::new(),
        };

        self.last_kind = Some(chunk.kind());
        Ok(result)
    }

    /// Footnotes for document edits proposed during the stream
    pub fn end(&self) -> String {
        self.doc_edit_footnotes
            .iter()
            .enumerate()
            .map(|(i, footnote)| {
                format!(
                    "[^edit{}]: {}",
                    i + 1,
                    serde_json::to_string(footnote).unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn tool_call_status(&mut self, tool_name: &str, args: &Value) -> String {
        match tool_name {
            "conversation_summary" => "\nSummarizing context\n".to_string(),
            "web_search_exa" | "web_search" => {
                format!("\nSearching the web \"{}\"\n", arg_str(args, "query"))
            }
            "web_crawl_exa" => format!("\nCrawling the web \"{}\"\n", arg_str(args, "url")),
            "doc_keyword_search" => {
                format!("\nSearching the keyword \"{}\"\n", arg_str(args, "query"))
            }
            "doc_read" => format!("\nReading the doc \"{}\"\n", arg_str(args, "doc_id")),
            "doc_compose" => format!("\nWriting document \"{}\"\n", arg_str(args, "title")),
            "doc_edit" => {
                self.doc_edit_footnotes.push(DocEditFootnote {
                    kind: "doc-edit",
                    intent: arg_str(args, "instructions"),
                    result: String::new(),
                });
                String::new()
            }
            _ => String::new(),
        }
    }

    fn tool_result_status(&mut self, tool_name: &str, args: &Value, result: &Value) -> String {
        match tool_name {
            "doc_edit" => match result.get("result").and_then(Value::as_array) {
                Some(items) => {
                    let changed: String = items
                        .iter()
                        .map(|item| format!("\n{}\n", arg_str(item, "changedContent")))
                        .collect();
                    if let Some(last) = self.doc_edit_footnotes.last_mut() {
                        last.result = changed.clone();
                    }
                    changed
                }
                None => {
                    self.doc_edit_footnotes.pop();
                    String::new()
                }
            },
            "doc_semantic_search" => match result {
                Value::Array(items) => found_documents(items.len(), &arg_str(args, "query")),
                Value::String(message) => format!("\n{}\n", message),
                other => {
                    warn!(
                        message = %arg_str(other, "message"),
                        "Unexpected result type for doc_semantic_search"
                    );
                    String::new()
                }
            },
            "doc_keyword_search" => match result.as_array() {
                Some(items) => {
                    let links: String = items
                        .iter()
                        .map(|doc| {
                            format!(
                                "\n\n[{}]({})\n\n",
                                arg_str(doc, "title"),
                                arg_str(doc, "docId")
                            )
                        })
                        .collect();
                    format!(
                        "{}\n{}\n",
                        found_documents(items.len(), &arg_str(args, "query")),
                        links
                    )
                }
                None => String::new(),
            },
            "doc_compose" => match result.get("title") {
                Some(title) => format!(
                    "\nDocument \"{}\" created successfully with {} words.\n",
                    value_text(title),
                    result.get("wordCount").map(value_text).unwrap_or_default()
                ),
                None => String::new(),
            },
            "web_search_exa" | "web_search" => match result.as_array() {
                Some(items) => {
                    let links: String = items
                        .iter()
                        .map(|item| {
                            let url = arg_str(item, "url");
                            let title = item
                                .get("title")
                                .and_then(Value::as_str)
                                .map(str::to_string)
                                .unwrap_or_else(|| url.clone());
                            format!("\n\n[{}]({})\n\n", title, url)
                        })
                        .collect();
                    format!("\n{}\n", links)
                }
                None => String::new(),
            },
            _ => String::new(),
        }
    }

    fn add_prefix(&mut self, text: &str) -> String {
        match self.prefix.take() {
            Some(prefix) => format!("{}{}", prefix, text),
            None => text.to_string(),
        }
    }

    fn add_newline(&self, kind: &'static str, text: &str) -> String {
        match self.last_kind {
            Some(last) if last != kind => format!("\n\n{}", text),
            _ => text.to_string(),
        }
    }
}

fn mark_as_callout(text: &str) -> String {
    text.replace('\n', "\n> ")
}

fn found_documents(count: usize, query: &str) -> String {
    format!(
        "\nFound {} document{} related to “{}”.\n",
        count,
        if count != 1 { "s" } else { "" },
        query
    )
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn arg_str(value: &Value, key: &str) -> String {
    value.get(key).map(value_text).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::llm::FinishReason;
    use serde_json::json;

    #[test]
    fn test_text_delta() {
        let mut parser = TextStreamParser::new();
        assert_eq!(parser.parse(&StreamChunk::text("Hello world")).unwrap(), "Hello world");
    }

    #[test]
    fn test_reasoning_as_callout() {
        let mut parser = TextStreamParser::new();
        let output = parser
            .parse(&StreamChunk::reasoning("I need to think about this"))
            .unwrap();
        assert_eq!(output, "\n> [!]\n> I need to think about this");
    }

    #[test]
    fn test_web_search_call() {
        let mut parser = TextStreamParser::new();
        let chunk = StreamChunk::tool_call(
            "test-id-1",
            "web_search_exa",
            json!({"query": "test query", "mode": "AUTO"}),
        );
        assert_eq!(
            parser.parse(&chunk).unwrap(),
            "\n> [!]\n> \n> Searching the web \"test query\"\n> "
        );
    }

    #[test]
    fn test_web_crawl_call() {
        let mut parser = TextStreamParser::new();
        let chunk =
            StreamChunk::tool_call("test-id-2", "web_crawl_exa", json!({"url": "https://example.com"}));
        assert_eq!(
            parser.parse(&chunk).unwrap(),
            "\n> [!]\n> \n> Crawling the web \"https://example.com\"\n> "
        );
    }

    #[test]
    fn test_web_search_result_links() {
        let mut parser = TextStreamParser::new();
        let chunk = StreamChunk::tool_result(
            "test-id-1",
            "web_search_exa",
            json!({"query": "test query", "mode": "AUTO"}),
            json!([
                {"title": "Test Title", "url": "https://test.com", "content": "Test content"},
                {"title": null, "url": "https://example.com", "content": "Example content"}
            ]),
        );
        assert_eq!(
            parser.parse(&chunk).unwrap(),
            "\n> [!]\n> \n> \n> \n> [Test Title](https://test.com)\n> \n> \n> \n> [https://example.com](https://example.com)\n> \n> \n> "
        );
    }

    #[test]
    fn test_error_chunk_fails() {
        let mut parser = TextStreamParser::new();
        let error = parser
            .parse(&StreamChunk::error("Test error message"))
            .unwrap_err();
        assert_eq!(error, DomainError::stream("Test error message"));
    }

    #[test]
    fn test_prefix_only_once_until_text_resumes() {
        let mut parser = TextStreamParser::new();

        assert_eq!(parser.parse(&StreamChunk::reasoning("a")).unwrap(), "\n> [!]\n> a");
        assert_eq!(parser.parse(&StreamChunk::reasoning("b\nc")).unwrap(), "b\n> c");
        assert_eq!(parser.parse(&StreamChunk::text("answer")).unwrap(), "\n\nanswer");
        assert_eq!(parser.parse(&StreamChunk::text(" more")).unwrap(), " more");
        assert_eq!(parser.parse(&StreamChunk::reasoning("again")).unwrap(), "\n> [!]\n> again");
    }

    #[test]
    fn test_semantic_search_results() {
        let mut parser = TextStreamParser::new();
        parser.parse(&StreamChunk::text("x")).unwrap();

        let found = StreamChunk::tool_result(
            "c1",
            "doc_semantic_search",
            json!({"query": "roadmap"}),
            json!([{"docId": "a"}]),
        );
        assert_eq!(
            parser.parse(&found).unwrap(),
            "\n> [!]\n> \n> Found 1 document related to “roadmap”.\n> "
        );

        let message = StreamChunk::tool_result(
            "c2",
            "doc_semantic_search",
            json!({"query": "q"}),
            json!("No results found for \"q\"."),
        );
        assert_eq!(
            parser.parse(&message).unwrap(),
            "\n> No results found for \"q\".\n> "
        );
    }

    #[test]
    fn test_keyword_search_results() {
        let mut parser = TextStreamParser::new();
        let chunk = StreamChunk::tool_result(
            "c1",
            "doc_keyword_search",
            json!({"query": "plan"}),
            json!([{"docId": "d1", "title": "Plan"}, {"docId": "d2", "title": "Plan B"}]),
        );
        let output = parser.parse(&chunk).unwrap();

        assert!(output.starts_with("\n> [!]\n> \n> Found 2 documents related to “plan”.\n> "));
        assert!(output.contains("[Plan](d1)"));
        assert!(output.contains("[Plan B](d2)"));
    }

    #[test]
    fn test_doc_compose_messages() {
        let mut parser = TextStreamParser::new();
        let call = StreamChunk::tool_call("c1", "doc_compose", json!({"title": "Notes"}));
        assert_eq!(
            parser.parse(&call).unwrap(),
            "\n> [!]\n> \n> Writing document \"Notes\"\n> "
        );

        let result = StreamChunk::tool_result(
            "c1",
            "doc_compose",
            json!({"title": "Notes"}),
            json!({"title": "Notes", "markdown": "# Notes", "wordCount": 2}),
        );
        assert_eq!(
            parser.parse(&result).unwrap(),
            "\n> Document \"Notes\" created successfully with 2 words.\n> "
        );
    }

    #[test]
    fn test_doc_edit_footnotes() {
        let mut parser = TextStreamParser::new();
        let args = json!({"instructions": "I will bold the title"});

        parser
            .parse(&StreamChunk::tool_call("e1", "doc_edit", args.clone()))
            .unwrap();
        let rendered = parser
            .parse(&StreamChunk::tool_result(
                "e1",
                "doc_edit",
                args.clone(),
                json!({"result": [{"op": "bold", "changedContent": "**Title**"}]}),
            ))
            .unwrap();
        assert_eq!(rendered, "\n> **Title**\n> ");

        parser
            .parse(&StreamChunk::tool_call("e2", "doc_edit", args.clone()))
            .unwrap();
        parser
            .parse(&StreamChunk::tool_result(
                "e2",
                "doc_edit",
                args,
                json!("Doc not found or doc is empty"),
            ))
            .unwrap();

        assert_eq!(
            parser.end(),
            "[^edit1]: {\"type\":\"doc-edit\",\"intent\":\"I will bold the title\",\"result\":\"\\n**Title**\\n\"}"
        );
    }

    #[test]
    fn test_finish_renders_nothing() {
        let mut parser = TextStreamParser::new();
        assert_eq!(
            parser.parse(&StreamChunk::finish(FinishReason::Stop)).unwrap(),
            ""
        );
        assert_eq!(parser.end(), "");
    }
}
