//! Canonical stream events and the parsers that render them

mod chunk;
mod citation;
mod object;
mod pattern;
mod text;

pub use chunk::{StreamChunk, StreamObject};
pub use citation::{encode_uri_component, Citation, CitationParser};
pub use object::StreamObjectParser;
pub use pattern::{Pattern, PatternHandler, StreamPatternParser};
pub use text::TextStreamParser;
