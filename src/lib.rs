//! Copilot Gateway
//!
//! One provider contract over several LLM vendors:
//! - Capability-based model selection across registered providers
//! - Streaming normalization with inline citation footnotes
//! - Host tools the model can call mid-stream

pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use config::AppConfig;
