//! Archive types for Strata.
//!
//! These types model the source-of-truth layer: conversations and their
//! ordered messages, together with the per-message status fields that drive
//! the embedding and extraction work queues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a conversation.
///
/// Maps to the CHECK constraint in the SQLite schema:
/// `CHECK (status IN ('active', 'summarized'))`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    #[default]
    Active,
    Summarized,
}

impl fmt::Display for ConversationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationStatus::Active => write!(f, "active"),
            ConversationStatus::Summarized => write!(f, "summarized"),
        }
    }
}

impl FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(ConversationStatus::Active),
            "summarized" => Ok(ConversationStatus::Summarized),
            other => Err(format!("invalid conversation status: '{other}'")),
        }
    }
}

/// Who authored a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
            MessageRole::System => write!(f, "system"),
        }
    }
}

impl FromStr for MessageRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(format!("invalid message role: '{other}'")),
        }
    }
}

/// Embedding state of a message.
///
/// Only `Ready` messages are visible to similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingStatus {
    #[default]
    Pending,
    Ready,
    Failed,
}

impl fmt::Display for EmbeddingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingStatus::Pending => write!(f, "pending"),
            EmbeddingStatus::Ready => write!(f, "ready"),
            EmbeddingStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for EmbeddingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(EmbeddingStatus::Pending),
            "ready" => Ok(EmbeddingStatus::Ready),
            "failed" => Ok(EmbeddingStatus::Failed),
            other => Err(format!("invalid embedding status: '{other}'")),
        }
    }
}

/// Which path produced a stored embedding vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingSource {
    /// The remote embedding model.
    Model,
    /// The deterministic local hash embedding.
    Fallback,
}

impl fmt::Display for EmbeddingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmbeddingSource::Model => write!(f, "model"),
            EmbeddingSource::Fallback => write!(f, "fallback"),
        }
    }
}

impl FromStr for EmbeddingSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "model" => Ok(EmbeddingSource::Model),
            "fallback" => Ok(EmbeddingSource::Fallback),
            other => Err(format!("invalid embedding source: '{other}'")),
        }
    }
}

/// Knowledge extraction state of a message.
///
/// `unprocessed -> extracted -> merged`; `merged` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    #[default]
    Unprocessed,
    Extracted,
    Merged,
    ExtractionFailed,
}

impl fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExtractionStatus::Unprocessed => write!(f, "unprocessed"),
            ExtractionStatus::Extracted => write!(f, "extracted"),
            ExtractionStatus::Merged => write!(f, "merged"),
            ExtractionStatus::ExtractionFailed => write!(f, "extraction_failed"),
        }
    }
}

impl FromStr for ExtractionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "unprocessed" => Ok(ExtractionStatus::Unprocessed),
            "extracted" => Ok(ExtractionStatus::Extracted),
            "merged" => Ok(ExtractionStatus::Merged),
            "extraction_failed" => Ok(ExtractionStatus::ExtractionFailed),
            other => Err(format!("invalid extraction status: '{other}'")),
        }
    }
}

/// A conversation header.
///
/// Messages are loaded separately; see [`ArchivedConversation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    /// Owner / user scope the conversation belongs to.
    pub owner: String,
    /// Optional project scope. `None` means "general".
    pub project: Option<String>,
    pub title: Option<String>,
    pub status: ConversationStatus,
    /// Failed compaction attempts so far.
    pub compaction_attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single archived message.
///
/// Content and position are immutable once archived. The embedding vector
/// is never serialized; it is only read by the similarity primitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub conversation_id: Uuid,
    /// Zero-based order within the conversation.
    pub position: u32,
    pub role: MessageRole,
    pub content: String,
    /// Tokens in `content`, counted when the message is archived.
    pub token_count: u32,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
    pub embedding_status: EmbeddingStatus,
    pub embedding_source: Option<EmbeddingSource>,
    pub embedding_attempts: u32,
    pub extraction_status: ExtractionStatus,
    pub extraction_attempts: u32,
    pub last_error: Option<String>,
}

/// A conversation together with its messages in conversation order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchivedConversation {
    pub conversation: Conversation,
    pub messages: Vec<Message>,
}

/// Input for a message that has not been archived yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    /// Defaults to the archive time when absent.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Input for archiving a conversation with its ordered messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConversation {
    pub owner: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    pub messages: Vec<NewMessage>,
}

impl NewMessage {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            created_at: None,
        }
    }

    /// Check that the message carries the required fields.
    pub fn validate(&self) -> Result<(), String> {
        if self.content.trim().is_empty() {
            return Err("message content must not be empty".to_string());
        }
        Ok(())
    }
}

impl NewConversation {
    /// Check that the conversation carries the required fields.
    pub fn validate(&self) -> Result<(), String> {
        if self.owner.trim().is_empty() {
            return Err("conversation owner must not be empty".to_string());
        }
        if self.messages.is_empty() {
            return Err("conversation must contain at least one message".to_string());
        }
        for (i, message) in self.messages.iter().enumerate() {
            message
                .validate()
                .map_err(|e| format!("message {i}: {e}"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_status_roundtrip() {
        for status in [ConversationStatus::Active, ConversationStatus::Summarized] {
            let parsed: ConversationStatus = status.to_string().parse().unwrap();
            assert_eq!(status, parsed);
        }
        assert!("archived".parse::<ConversationStatus>().is_err());
    }

    #[test]
    fn test_extraction_status_serde_and_parse() {
        let json = serde_json::to_string(&ExtractionStatus::ExtractionFailed).unwrap();
        assert_eq!(json, "\"extraction_failed\"");
        assert_eq!(
            "extraction-failed".parse::<ExtractionStatus>().unwrap(),
            ExtractionStatus::ExtractionFailed
        );
        assert_eq!(
            ExtractionStatus::ExtractionFailed.to_string(),
            "extraction_failed"
        );
    }

    #[test]
    fn test_message_role_parse_case_insensitive() {
        assert_eq!("Assistant".parse::<MessageRole>().unwrap(), MessageRole::Assistant);
        assert!("tool".parse::<MessageRole>().is_err());
    }

    #[test]
    fn test_new_conversation_validation() {
        let mut conv = NewConversation {
            owner: "alice".into(),
            project: None,
            title: None,
            messages: vec![NewMessage::new(MessageRole::User, "hello")],
        };
        assert!(conv.validate().is_ok());

        conv.messages.push(NewMessage::new(MessageRole::Assistant, "   "));
        let err = conv.validate().unwrap_err();
        assert!(err.contains("message 1"));

        conv.messages.clear();
        assert!(conv.validate().is_err());

        conv.messages.push(NewMessage::new(MessageRole::User, "hi"));
        conv.owner = " ".into();
        assert!(conv.validate().unwrap_err().contains("owner"));
    }

    #[test]
    fn test_message_embedding_not_serialized() {
        let message = Message {
            id: Uuid::now_v7(),
            conversation_id: Uuid::now_v7(),
            position: 0,
            role: MessageRole::User,
            content: "I prefer dark mode".into(),
            token_count: 4,
            created_at: Utc::now(),
            embedding: Some(vec![0.1, 0.2]),
            embedding_status: EmbeddingStatus::Ready,
            embedding_source: Some(EmbeddingSource::Fallback),
            embedding_attempts: 0,
            extraction_status: ExtractionStatus::Unprocessed,
            extraction_attempts: 0,
            last_error: None,
        };
        let json = serde_json::to_value(&message).unwrap();
        assert!(json.get("embedding").is_none());
        assert_eq!(json["embedding_source"], "fallback");
        assert_eq!(json["role"], "user");
        assert_eq!(json["token_count"], 4);
    }

    #[test]
    fn test_new_message_created_at_defaults() {
        let msg: NewMessage =
            serde_json::from_str(r#"{"role":"user","content":"hello"}"#).unwrap();
        assert!(msg.created_at.is_none());
    }
}
