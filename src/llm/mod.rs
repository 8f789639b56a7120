//! LLM integration for datapilot.
//!
//! The orchestration core talks to language models for two jobs only:
//! extracting analytical intent from the user's query (NLU collaborator) and
//! synthesizing the final natural-language summary. Both go through the
//! [`LlmProvider`] trait so tests and offline deployments can substitute
//! deterministic implementations.

pub mod client;

pub use client::{
    Choice, GenerationRequest, GenerationResponse, LlmClient, LlmProvider, Message, Usage,
};
