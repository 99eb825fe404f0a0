//! LLM integration - OpenAI-compatible chat completions
//!
//! This module provides:
//! - The [`CompletionService`] seam used by the remote-model extractor
//! - An OpenRouter HTTP client implementing it
//! - Request/response types matching the OpenAI-compatible API

mod client;
mod types;

pub use client::{CompletionService, LlmClient, LlmClientBuilder};
pub use types::{ChatRequest, ChatResponse, Choice, FinishReason, LlmResponse, Message, MessageRole, Usage};
