use serde::Serialize;

use super::pattern::{Pattern, PatternHandler, StreamPatternParser};

/// A source referenced from generated text by a 1-based footnote index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Citation {
    Url(String),
    Doc(String),
    Attachment(String),
}

impl From<&str> for Citation {
    fn from(url: &str) -> Self {
        Self::Url(url.to_string())
    }
}

impl From<String> for Citation {
    fn from(url: String) -> Self {
        Self::Url(url)
    }
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum FootnoteRecord<'a> {
    Url {
        url: String,
    },
    Doc {
        #[serde(rename = "docId")]
        doc_id: &'a str,
    },
    Attachment {
        #[serde(rename = "blobId")]
        blob_id: &'a str,
    },
}

impl Citation {
    fn footnote(&self) -> String {
        let record = match self {
            Self::Url(url) => FootnoteRecord::Url {
                url: encode_uri_component(url),
            },
            Self::Doc(doc_id) => FootnoteRecord::Doc { doc_id },
            Self::Attachment(blob_id) => FootnoteRecord::Attachment { blob_id },
        };
        serde_json::to_string(&record).unwrap_or_default()
    }
}

/// Percent-encode like ECMAScript `encodeURIComponent`
pub fn encode_uri_component(input: &str) -> String {
    urlencoding::encode(input)
        .replace("%21", "!")
        .replace("%27", "'")
        .replace("%28", "(")
        .replace("%29", ")")
        .replace("%2A", "*")
}

#[derive(Debug, Default)]
struct CitationList(Vec<Citation>);

impl CitationList {
    fn position_of_url(&self, url: &str) -> Option<usize> {
        self.0
            .iter()
            .position(|c| matches!(c, Citation::Url(u) if u == url))
    }
}

impl PatternHandler for CitationList {
    fn on_pattern(&mut self, pattern: Pattern) -> String {
        match pattern {
            Pattern::Index(n) if n >= 1 && (n as usize) <= self.0.len() => format!("[^{}]", n),
            Pattern::Index(n) => format!("[{}]", n),
            Pattern::WrappedLink { url, .. } => {
                let index = match self.position_of_url(&url) {
                    Some(existing) => existing + 1,
                    None => {
                        self.0.push(Citation::Url(url));
                        self.0.len()
                    }
                };
                format!("[^{}]", index)
            }
            Pattern::Link { text, url } => format!("[{}]({})", text, url),
        }
    }
}

/// Rewrites citation markers into footnote references and emits the
/// reference block at the end of the stream.
///
/// Indices are never renumbered: once a URL has index `k` every later
/// reference to it renders as `[^k]`. Citations pushed by the vendor keep
/// their vendor-assigned positions.
#[derive(Debug, Default)]
pub struct CitationParser {
    citations: CitationList,
    parser: StreamPatternParser,
}

impl CitationParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, citation: impl Into<Citation>) {
        self.citations.0.push(citation.into());
    }

    pub fn parse(&mut self, content: &str) -> String {
        self.parser.write(content, &mut self.citations)
    }

    /// Resolve buffered text as if the text run ended here. Used before
    /// non-text output is interleaved so nothing is reordered behind it.
    pub fn flush(&mut self) -> String {
        self.parser.end(&mut self.citations)
    }

    /// Flush buffered text, followed by the footnote block if any citation exists
    pub fn end(&mut self) -> String {
        let rest = self.flush();
        if self.citations.0.is_empty() {
            return rest;
        }
        format!("{}\n{}", rest, self.footnotes())
    }

    pub fn citations(&self) -> &[Citation] {
        &self.citations.0
    }

    fn footnotes(&self) -> String {
        self.citations
            .0
            .iter()
            .enumerate()
            .map(|(i, c)| format!("[^{}]:{}", i + 1, c.footnote()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}
