//! Incremental recognizer for citation and link markers in streamed text
//!
//! Three surface forms are recognized while text is still arriving:
//! - `[N]` and `[[N]]`: a bare numeric index
//! - `[text](url)`: a markdown link
//! - `([text](url))`: a link wrapped in parentheses, as some vendors cite sources
//!
//! Feeding a string in any chunking through [`StreamPatternParser::write`]
//! followed by [`StreamPatternParser::end`] yields the same output as feeding
//! it in one piece. Every decision is made from buffered characters only; when
//! the buffer ends before a decision is possible the parser keeps the suffix
//! and waits for the next chunk.

/// Upper bound on how far a single pattern may extend before it is given up
/// and emitted as literal text.
const MAX_PATTERN_LEN: usize = 2048;

/// A recognized pattern handed to the [`PatternHandler`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Index(u32),
    Link { text: String, url: String },
    WrappedLink { text: String, url: String },
}

/// Produces the replacement text for a recognized pattern
pub trait PatternHandler {
    fn on_pattern(&mut self, pattern: Pattern) -> String;
}

impl<F> PatternHandler for F
where
    F: FnMut(Pattern) -> String,
{
    fn on_pattern(&mut self, pattern: Pattern) -> String {
        self(pattern)
    }
}

enum Scan<'a> {
    NeedMore,
    Fail { next: usize },
    Index { end: usize, value: u32 },
    Link { end: usize, text: &'a str, url: &'a str },
}

/// Buffering scanner, owned by exactly one in-flight stream
#[derive(Debug, Default)]
pub struct StreamPatternParser {
    buffer: String,
}

impl StreamPatternParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return whatever output can be decided so far.
    pub fn write<H>(&mut self, chunk: &str, handler: &mut H) -> String
    where
        H: PatternHandler + ?Sized,
    {
        self.buffer.push_str(chunk);
        self.drain(handler, false)
    }

    /// Resolve everything still buffered as if no further input follows.
    ///
    /// A complete `[N]` waiting for a possible `(` becomes an index, and
    /// fragments that can no longer complete are emitted as literal text.
    pub fn end<H>(&mut self, handler: &mut H) -> String
    where
        H: PatternHandler + ?Sized,
    {
        self.drain(handler, true)
    }

    fn drain<H>(&mut self, handler: &mut H, finished: bool) -> String
    where
        H: PatternHandler + ?Sized,
    {
        let buffer = self.buffer.as_str();
        let bytes = buffer.as_bytes();
        let mut output = String::with_capacity(buffer.len());
        let mut i = 0;

        while i < bytes.len() {
            let ch = bytes[i];

            if ch != b'[' && ch != b'(' {
                let next = find_marker(bytes, i + 1);
                output.push_str(&buffer[i..next]);
                i = next;
                continue;
            }

            let wrapped = ch == b'(';
            if wrapped {
                match bytes.get(i + 1) {
                    None if !finished => break,
                    Some(b'[') => {}
                    _ => {
                        output.push('(');
                        i += 1;
                        continue;
                    }
                }
            }

            let start = if wrapped { i + 1 } else { i };
            let (end, pattern) = match scan(buffer, start, finished) {
                Scan::NeedMore => break,
                Scan::Fail { next } => {
                    output.push_str(&buffer[i..next]);
                    i = next;
                    continue;
                }
                Scan::Index { end, value } => (end, Pattern::Index(value)),
                Scan::Link { end, text, url } => {
                    let (text, url) = (text.to_string(), url.to_string());
                    if wrapped {
                        (end, Pattern::WrappedLink { text, url })
                    } else {
                        (end, Pattern::Link { text, url })
                    }
                }
            };

            if !wrapped {
                output.push_str(&handler.on_pattern(pattern));
                i = end;
                continue;
            }

            match bytes.get(end) {
                None if !finished => break,
                Some(b')') => {
                    output.push_str(&handler.on_pattern(pattern));
                    i = end + 1;
                }
                _ => {
                    // not wrapped after all; rescan from the bracket
                    output.push('(');
                    i = start;
                }
            }
        }

        self.buffer.drain(..i);
        output
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}

fn find_marker(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|b| *b == b'[' || *b == b'(')
        .map_or(bytes.len(), |p| from + p)
}

/// With `finished` set the end of the buffer is the end of input, so the
/// scan always decides and never asks for more.
fn scan(buffer: &str, pos: usize, finished: bool) -> Scan<'_> {
    let bytes = buffer.as_bytes();
    if bytes.get(pos + 1) == Some(&b'[') {
        return scan_nested_index(buffer, pos, finished);
    }
    scan_bracket(buffer, pos, finished)
}

/// `[[N]]`: the closing run must match the opening run and no `(` may follow.
fn scan_nested_index(buffer: &str, pos: usize, finished: bool) -> Scan<'_> {
    let bytes = buffer.as_bytes();
    let len = bytes.len();
    let mut i = pos;

    let mut open = 0;
    while i < len && bytes[i] == b'[' {
        if i - pos >= MAX_PATTERN_LEN {
            return Scan::Fail { next: pos + 1 };
        }
        open += 1;
        i += 1;
    }

    let content_start = i;
    while i < len && bytes[i] != b']' {
        if i - pos >= MAX_PATTERN_LEN {
            return Scan::Fail { next: pos + 1 };
        }
        i += 1;
    }
    let content = &buffer[content_start..i];

    let mut close = 0;
    while i < len && bytes[i] == b']' {
        close += 1;
        i += 1;
    }

    // a further `]` or a `(` may still arrive
    if i >= len && !finished {
        return Scan::NeedMore;
    }

    if close == open {
        if let Some(value) = parse_index(content) {
            if bytes.get(i) == Some(&b'(') {
                return Scan::Fail { next: i };
            }
            return Scan::Index { end: i, value };
        }
    }

    Scan::Fail { next: pos + 1 }
}

/// `[N]`, `[text](url)`, or a literal bracket
fn scan_bracket(buffer: &str, pos: usize, finished: bool) -> Scan<'_> {
    let bytes = buffer.as_bytes();
    let len = bytes.len();
    let mut i = pos + 1;

    while i < len && bytes[i] != b']' {
        if bytes[i] == b'[' {
            return Scan::Fail { next: i };
        }
        if i - pos >= MAX_PATTERN_LEN {
            return Scan::Fail { next: pos + 1 };
        }
        i += 1;
    }
    if i >= len {
        return unterminated(pos, finished);
    }

    let text = &buffer[pos + 1..i];
    let after = i + 1;
    let next = bytes.get(after);
    if next.is_none() && !finished {
        return Scan::NeedMore;
    }

    if next != Some(&b'(') {
        return match parse_index(text) {
            Some(value) => Scan::Index { end: after, value },
            None => Scan::Fail { next: after },
        };
    }

    let url_start = after + 1;
    i = url_start;
    while i < len && bytes[i] != b')' {
        if i - pos >= MAX_PATTERN_LEN {
            return Scan::Fail { next: pos + 1 };
        }
        i += 1;
    }
    if i >= len {
        return unterminated(pos, finished);
    }

    Scan::Link {
        end: i + 1,
        text,
        url: &buffer[url_start..i],
    }
}

fn unterminated(pos: usize, finished: bool) -> Scan<'static> {
    if finished {
        Scan::Fail { next: pos + 1 }
    } else {
        Scan::NeedMore
    }
}

fn parse_index(content: &str) -> Option<u32> {
    let trimmed = content.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    trimmed.parse().ok()
}
