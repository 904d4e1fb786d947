use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ChatMessageId, ConversationId, TenantId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConversationKind {
  Direct,
  Group,
  Channel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ParticipantRole {
  Admin,
  Moderator,
  Member,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ChatMessageKind {
  Text,
  Emoji,
  File,
  Image,
  System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConversation {
  pub id: ConversationId,
  pub tenant_id: TenantId,
  pub kind: ConversationKind,
  pub title: Option<String>,
  pub created_by: UserId,
  pub created_at: DateTime<Utc>,
  pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatParticipant {
  pub conversation_id: ConversationId,
  pub user_id: UserId,
  pub role: ParticipantRole,
  pub joined_at: DateTime<Utc>,
  pub last_seen_at: Option<DateTime<Utc>>,
  /// A participant with `left_at` set is inactive and may not send
  pub left_at: Option<DateTime<Utc>>,
}

impl ChatParticipant {
  pub fn is_active(&self) -> bool {
    self.left_at.is_none()
  }
}

/// Messages are soft-deleted so reaction totals and reply pointers stay valid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
  pub id: ChatMessageId,
  pub conversation_id: ConversationId,
  pub sender_id: UserId,
  pub kind: ChatMessageKind,
  pub content: String,
  pub reply_to: Option<ChatMessageId>,
  pub created_at: DateTime<Utc>,
  pub edited_at: Option<DateTime<Utc>>,
  pub deleted_at: Option<DateTime<Utc>>,
}

/// Unique per `(message, user, emoji)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReaction {
  pub message_id: ChatMessageId,
  pub user_id: UserId,
  pub emoji: String,
  pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
  Online,
  Away,
  Offline,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPresence {
  pub tenant_id: TenantId,
  pub user_id: UserId,
  pub status: PresenceStatus,
  pub last_seen: DateTime<Utc>,
}
