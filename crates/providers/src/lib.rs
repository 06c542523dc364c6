//! LLM provider adapters for the Cairn engine.
//!
//! One trait ([`LlmProvider`]), one wire adapter (OpenAI-compatible chat
//! completions), a role-based [`registry::ProviderRegistry`], and a
//! scripted [`mock::MockProvider`] for tests.

pub mod mock;
pub mod openai_compat;
pub mod registry;
mod sse;
pub mod traits;
mod util;

pub use registry::ProviderRegistry;
pub use traits::{ChatRequest, ChatResponse, LlmProvider};
