//! Prompt construction.
//!
//! Both backends receive the same two messages: the fixed system prompt and a user prompt
//! that embeds the code verbatim.

use crate::types::{ChatCompletionRequest, ChatMessage};

const SYSTEM_PROMPT: &str = "You are a coding assistant. You will be provided with a code \
snippet and your task is to explain the code in detail. You should provide a detailed \
explanation of the code. It should be in a markdown format. It might happen that the code is \
not correct. In that case, you should provide a detailed explanation of what is wrong with the \
code and then provide the corrected code snippet. If not asked for more, answer in up to 250 \
words.";

/// The instruction that establishes the assistant's role.
pub fn system_prompt() -> &'static str {
    SYSTEM_PROMPT
}

/// The user message for `code`.
///
/// The code is embedded as-is; nothing is escaped or truncated.
pub fn user_prompt(code: &str) -> String {
    format!("Explain the following code in detail:\n\n{code}\n\n###\n\n")
}

/// An immutable request for one explanation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExplanationRequest {
    system_prompt: String,
    user_prompt: String,
    model: String,
}

impl ExplanationRequest {
    /// Build the request that explains `code` with `model`.
    pub fn new(code: &str, model: impl Into<String>) -> Self {
        Self {
            system_prompt: system_prompt().to_string(),
            user_prompt: user_prompt(code),
            model: model.into(),
        }
    }

    /// The system prompt.
    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// The user prompt.
    pub fn user_prompt(&self) -> &str {
        &self.user_prompt
    }

    /// The model identifier.
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Explanations are always streamed.
    pub fn stream(&self) -> bool {
        true
    }

    /// The wire request.
    pub fn to_chat_request(&self) -> ChatCompletionRequest {
        self.clone().into()
    }
}

impl From<ExplanationRequest> for ChatCompletionRequest {
    fn from(request: ExplanationRequest) -> Self {
        ChatCompletionRequest::new(
            request.model,
            vec![
                ChatMessage::system(request.system_prompt),
                ChatMessage::user(request.user_prompt),
            ],
        )
    }
}
