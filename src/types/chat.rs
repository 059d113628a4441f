use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Deserialize)]
pub struct UpdateConversationRequest {
    pub title: String,
}

#[derive(Deserialize)]
pub struct AutorenameConversationRequest {
    pub text: String,
}

/// Structured advising context for one student. Every field is optional;
/// prompt rendering skips the absent ones.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StudentContext {
    pub department: Option<String>,
    pub year: Option<i32>,
    pub gpa: Option<f32>,
}

/// A retrieved context snippet before truncation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snippet {
    pub title: String,
    pub content: String,
}

/// Retrieval output attached to an assistant message. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub content: String,
    pub relevance: f32,
}

/// Side-channel tool output carried on the stream; never affects message text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultRecord {
    pub tool: String,
    pub result: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurnMessage {
    pub role: String,
    pub content: String,
}

#[derive(Deserialize)]
pub struct RagQueryRequest {
    pub messages: Vec<ChatTurnMessage>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub student_context: Option<StudentContext>,
    #[serde(default)]
    pub conversation_id: Option<Uuid>,
}
