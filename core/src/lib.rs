// Core avatar chat functionality shared by the daemon:
// - Upstream API clients (LLM chat completions, text-to-speech)
// - Request/response and dialogue data structures
// - Configuration loading
// - Shared error types

// Export client module - chat-completions client
pub mod client;
pub use client::*;

// Export tts module - speech synthesis client
pub mod tts;
pub use tts::*;

// Export types module - Request/response data structures
pub mod types;
pub use types::*;

// Export dialogue module - scripted avatar lines
pub mod dialogue;
pub use dialogue::*;

// Export config module - Configuration loading
pub mod config;
pub use config::*;

// Export errors module - Shared error types
pub mod errors;
pub use errors::*;
