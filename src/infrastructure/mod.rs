//! Infrastructure layer - vendor adapters, built-in tools, logging and metrics

pub mod llm;
pub mod logging;
pub mod metrics;
pub mod tools;
