use std::sync::Arc;

use avatar_core::types::{ChatMessage, Role};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

/// Conversation handle shared by all requests
pub type SharedConversation = Arc<Mutex<Conversation>>;

/// Append-only conversation history
#[derive(Debug, Clone)]
pub struct Conversation {
    entries: Vec<ChatMessage>,
    /// When the conversation was started
    pub created_at: DateTime<Utc>,
    /// Last time an entry was appended
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Start a conversation seeded with the system instruction
    pub fn new(system_prompt: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            entries: vec![ChatMessage::system(system_prompt)],
            created_at: now,
            updated_at: now,
        }
    }

    /// Wrap a new conversation for sharing across requests
    pub fn shared(system_prompt: impl Into<String>) -> SharedConversation {
        Arc::new(Mutex::new(Self::new(system_prompt)))
    }

    /// Add one entry to the end of the log
    pub fn append(&mut self, entry: ChatMessage) {
        self.entries.push(entry);
        self.updated_at = Utc::now();
    }

    /// The full history, system instruction first
    pub fn entries(&self) -> &[ChatMessage] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of entries with the given role
    pub fn count_role(&self, role: Role) -> usize {
        self.entries.iter().filter(|e| e.role == role).count()
    }
}
