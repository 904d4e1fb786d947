use async_trait::async_trait;
use chrono::Utc;
use courier_core::{
  ChatConversation, ChatMessage, ChatMessageId, ChatMessageKind, ChatParticipant, ConversationId,
  CoreError, PresenceStatus, TenantId, UserId,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// Relational chat model behind the hub.
///
/// Guards live here so every caller gets them: sending requires an active
/// participant row, edits are author-only, reactions are unique per
/// `(message, user, emoji)`, and deletes are soft.
#[async_trait]
pub trait ChatStore: Send + Sync {
  async fn conversation(
    &self,
    conversation_id: ConversationId,
  ) -> Result<Option<ChatConversation>, CoreError>;

  async fn participant(
    &self,
    conversation_id: ConversationId,
    user_id: UserId,
  ) -> Result<Option<ChatParticipant>, CoreError>;

  async fn message(&self, message_id: ChatMessageId) -> Result<Option<ChatMessage>, CoreError>;

  async fn create_message(
    &self,
    conversation_id: ConversationId,
    sender_id: UserId,
    kind: ChatMessageKind,
    content: &str,
    reply_to: Option<ChatMessageId>,
  ) -> Result<ChatMessage, CoreError>;

  async fn edit_message(
    &self,
    message_id: ChatMessageId,
    editor_id: UserId,
    content: &str,
  ) -> Result<ChatMessage, CoreError>;

  async fn delete_message(
    &self,
    message_id: ChatMessageId,
    deleter_id: UserId,
  ) -> Result<ChatMessage, CoreError>;

  /// Returns false when the reaction already exists
  async fn add_reaction(
    &self,
    message_id: ChatMessageId,
    user_id: UserId,
    emoji: &str,
  ) -> Result<bool, CoreError>;

  async fn remove_reaction(
    &self,
    message_id: ChatMessageId,
    user_id: UserId,
    emoji: &str,
  ) -> Result<bool, CoreError>;

  /// Advance the reader's `last_seen_at` on the participant row
  async fn mark_read(
    &self,
    conversation_id: ConversationId,
    user_id: UserId,
  ) -> Result<(), CoreError>;

  async fn update_presence(
    &self,
    tenant_id: &TenantId,
    user_id: UserId,
    status: PresenceStatus,
  ) -> Result<(), CoreError>;
}

pub struct PgChatStore {
  pool: PgPool,
}

impl PgChatStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  fn row_to_message(row: &PgRow) -> ChatMessage {
    ChatMessage {
      id: row.get("id"),
      conversation_id: row.get("conversation_id"),
      sender_id: row.get("sender_id"),
      kind: row.get("kind"),
      content: row.get("content"),
      reply_to: row.get("reply_to"),
      created_at: row.get("created_at"),
      edited_at: row.get("edited_at"),
      deleted_at: row.get("deleted_at"),
    }
  }

  async fn require_active_participant(
    &self,
    conversation_id: ConversationId,
    user_id: UserId,
  ) -> Result<ChatParticipant, CoreError> {
    self
      .participant(conversation_id, user_id)
      .await?
      .filter(ChatParticipant::is_active)
      .ok_or_else(|| {
        CoreError::Unauthorized(format!(
          "user {} is not an active participant of conversation {}",
          user_id, conversation_id
        ))
      })
  }
}

const MESSAGE_COLUMNS: &str =
  "id, conversation_id, sender_id, kind, content, reply_to, created_at, edited_at, deleted_at";

#[async_trait]
impl ChatStore for PgChatStore {
  async fn conversation(
    &self,
    conversation_id: ConversationId,
  ) -> Result<Option<ChatConversation>, CoreError> {
    let row = sqlx::query(
      "SELECT id, tenant_id, kind, title, created_by, created_at, deleted_at \
       FROM chat_conversations WHERE id = $1 AND deleted_at IS NULL",
    )
    .bind(conversation_id)
    .fetch_optional(&self.pool)
    .await?;

    Ok(row.map(|row| ChatConversation {
      id: row.get("id"),
      tenant_id: row.get("tenant_id"),
      kind: row.get("kind"),
      title: row.get("title"),
      created_by: row.get("created_by"),
      created_at: row.get("created_at"),
      deleted_at: row.get("deleted_at"),
    }))
  }

  async fn participant(
    &self,
    conversation_id: ConversationId,
    user_id: UserId,
  ) -> Result<Option<ChatParticipant>, CoreError> {
    let row = sqlx::query(
      "SELECT conversation_id, user_id, role, joined_at, last_seen_at, left_at \
       FROM chat_participants WHERE conversation_id = $1 AND user_id = $2",
    )
    .bind(conversation_id)
    .bind(user_id)
    .fetch_optional(&self.pool)
    .await?;

    Ok(row.map(|row| ChatParticipant {
      conversation_id: row.get("conversation_id"),
      user_id: row.get("user_id"),
      role: row.get("role"),
      joined_at: row.get("joined_at"),
      last_seen_at: row.get("last_seen_at"),
      left_at: row.get("left_at"),
    }))
  }

  async fn message(&self, message_id: ChatMessageId) -> Result<Option<ChatMessage>, CoreError> {
    let row = sqlx::query(&format!(
      "SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = $1"
    ))
    .bind(message_id)
    .fetch_optional(&self.pool)
    .await?;

    Ok(row.as_ref().map(Self::row_to_message))
  }

  async fn create_message(
    &self,
    conversation_id: ConversationId,
    sender_id: UserId,
    kind: ChatMessageKind,
    content: &str,
    reply_to: Option<ChatMessageId>,
  ) -> Result<ChatMessage, CoreError> {
    self
      .require_active_participant(conversation_id, sender_id)
      .await?;

    let row = sqlx::query(&format!(
      "INSERT INTO chat_messages (conversation_id, sender_id, kind, content, reply_to, created_at) \
       VALUES ($1, $2, $3, $4, $5, $6) \
       RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(conversation_id)
    .bind(sender_id)
    .bind(kind)
    .bind(content)
    .bind(reply_to)
    .bind(Utc::now())
    .fetch_one(&self.pool)
    .await?;

    Ok(Self::row_to_message(&row))
  }

  async fn edit_message(
    &self,
    message_id: ChatMessageId,
    editor_id: UserId,
    content: &str,
  ) -> Result<ChatMessage, CoreError> {
    let row = sqlx::query(&format!(
      "UPDATE chat_messages SET content = $3, edited_at = $4 \
       WHERE id = $1 AND sender_id = $2 AND deleted_at IS NULL \
       RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(message_id)
    .bind(editor_id)
    .bind(content)
    .bind(Utc::now())
    .fetch_optional(&self.pool)
    .await?;

    row.as_ref().map(Self::row_to_message).ok_or_else(|| {
      CoreError::Unauthorized(format!(
        "message {} cannot be edited by user {}",
        message_id, editor_id
      ))
    })
  }

  async fn delete_message(
    &self,
    message_id: ChatMessageId,
    deleter_id: UserId,
  ) -> Result<ChatMessage, CoreError> {
    let row = sqlx::query(&format!(
      "UPDATE chat_messages SET deleted_at = $3 \
       WHERE id = $1 AND sender_id = $2 AND deleted_at IS NULL \
       RETURNING {MESSAGE_COLUMNS}"
    ))
    .bind(message_id)
    .bind(deleter_id)
    .bind(Utc::now())
    .fetch_optional(&self.pool)
    .await?;

    row.as_ref().map(Self::row_to_message).ok_or_else(|| {
      CoreError::Unauthorized(format!(
        "message {} cannot be deleted by user {}",
        message_id, deleter_id
      ))
    })
  }

  async fn add_reaction(
    &self,
    message_id: ChatMessageId,
    user_id: UserId,
    emoji: &str,
  ) -> Result<bool, CoreError> {
    let result = sqlx::query(
      "INSERT INTO message_reactions (message_id, user_id, emoji, created_at) \
       VALUES ($1, $2, $3, $4) \
       ON CONFLICT (message_id, user_id, emoji) DO NOTHING",
    )
    .bind(message_id)
    .bind(user_id)
    .bind(emoji)
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() == 1)
  }

  async fn remove_reaction(
    &self,
    message_id: ChatMessageId,
    user_id: UserId,
    emoji: &str,
  ) -> Result<bool, CoreError> {
    let result = sqlx::query(
      "DELETE FROM message_reactions \
       WHERE message_id = $1 AND user_id = $2 AND emoji = $3",
    )
    .bind(message_id)
    .bind(user_id)
    .bind(emoji)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() == 1)
  }

  async fn mark_read(
    &self,
    conversation_id: ConversationId,
    user_id: UserId,
  ) -> Result<(), CoreError> {
    sqlx::query(
      "UPDATE chat_participants SET last_seen_at = $3 \
       WHERE conversation_id = $1 AND user_id = $2",
    )
    .bind(conversation_id)
    .bind(user_id)
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn update_presence(
    &self,
    tenant_id: &TenantId,
    user_id: UserId,
    status: PresenceStatus,
  ) -> Result<(), CoreError> {
    let status_str = match status {
      PresenceStatus::Online => "online",
      PresenceStatus::Away => "away",
      PresenceStatus::Offline => "offline",
    };

    sqlx::query(
      "INSERT INTO user_presence (tenant_id, user_id, status, last_seen) \
       VALUES ($1, $2, $3, $4) \
       ON CONFLICT (tenant_id, user_id) DO UPDATE SET status = $3, last_seen = $4",
    )
    .bind(tenant_id)
    .bind(user_id)
    .bind(status_str)
    .bind(Utc::now())
    .execute(&self.pool)
    .await?;

    Ok(())
  }
}
