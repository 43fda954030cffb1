//! Optional LLM backing for the reasoning engine.

pub mod client;
pub mod parser;

pub use client::{ChatMessage, ChatResponse, HttpLlmClient, HttpLlmClientBuilder, LlmClient, Usage};
pub use parser::extract_json;
