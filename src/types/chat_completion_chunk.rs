use serde::{Deserialize, Serialize};

/// One fragment of a streamed chat completion.
///
/// Fragments that carry no new text, such as the opening role-only fragment or the final
/// fragment holding only a finish reason, deserialize fine and report no delta.  A payload
/// without a `choices` array is not a chunk and fails to deserialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatCompletionChunk {
    /// Identifier shared by all chunks of one completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The model that produced the chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Unix timestamp of the completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<u64>,

    /// Per-choice deltas.  Only the first choice is read.
    pub choices: Vec<ChunkChoice>,
}

/// A single choice inside a [`ChatCompletionChunk`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkChoice {
    /// Index of the choice.
    #[serde(default)]
    pub index: u32,

    /// The incremental change for this choice.
    #[serde(default)]
    pub delta: ChunkDelta,

    /// Why generation stopped, on the final chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// The incremental content of a choice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkDelta {
    /// Role, usually present only on the first chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// New text, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl ChatCompletionChunk {
    /// Create a chunk carrying `text` as its only delta.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            choices: vec![ChunkChoice {
                delta: ChunkDelta {
                    role: None,
                    content: Some(text.into()),
                },
                ..ChunkChoice::default()
            }],
            ..Self::default()
        }
    }

    /// Create a chunk that carries no text.
    pub fn empty() -> Self {
        Self {
            choices: vec![ChunkChoice::default()],
            ..Self::default()
        }
    }

    /// The text this chunk adds, read from the first choice.
    pub fn delta_text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.delta.content.as_deref())
    }

    /// The finish reason of the first choice, if this is a final chunk.
    pub fn finish_reason(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.finish_reason.as_deref())
    }
}
