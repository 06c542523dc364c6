//! Cairn gateway — the turn-structured agent execution engine.
//!
//! An axum server exposes one SSE chat endpoint; behind it the runtime
//! plans a user question into a to-do list, drives an LLM through
//! tool-calling turns, reviews each turn, and streams a cited final
//! answer.

pub mod api;
pub mod runtime;
pub mod state;
pub mod stores;
