//! Conversation state for the chat daemon
//!
//! The daemon keeps one conversation for its whole lifetime: an append-only
//! log of role-tagged turns that is sent to the LLM on every request. It is
//! shared behind an async mutex so a request can append its user turn, call
//! the LLM and append the reply without other requests interleaving.

pub mod store;

pub use store::{Conversation, SharedConversation};
