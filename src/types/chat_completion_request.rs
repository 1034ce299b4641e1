use serde::{Deserialize, Serialize};

use crate::types::ChatMessage;

/// Body of a chat-completion request.
///
/// Both backends accept the same shape: a model identifier, the ordered messages, and the
/// `stream` flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    /// The model that will complete the conversation.
    pub model: String,

    /// Messages in the order the model should see them.
    pub messages: Vec<ChatMessage>,

    /// Whether the response is delivered incrementally as server-sent events.
    pub stream: bool,
}

impl ChatCompletionRequest {
    /// Create a new streaming request.
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: true,
        }
    }
}
