//! Newtype wrappers for the ID types in the system
//!
//! These types provide type safety and prevent mixing up different kinds of IDs

use serde::{Deserialize, Serialize};
use sqlx::Type;
use std::fmt;
use uuid::Uuid;

/// Tenant ID newtype - an opaque identifier scoping every other entity
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct TenantId(pub String);

/// User ID newtype
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct UserId(pub i64);

/// Conversation ID newtype
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct ConversationId(pub i64);

/// Chat message ID newtype
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct ChatMessageId(pub i64);

/// Delivery record ID newtype
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct DeliveryId(pub Uuid);

impl TenantId {
  pub fn new(id: impl Into<String>) -> Self {
    TenantId(id.into())
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }

  /// First eight characters of the id, used for branding fallbacks.
  /// Counts characters, not bytes, so non-ASCII ids never split a
  /// codepoint.
  pub fn short(&self) -> String {
    self.0.chars().take(8).collect()
  }
}

impl DeliveryId {
  pub fn generate() -> Self {
    DeliveryId(Uuid::new_v4())
  }
}

impl fmt::Display for TenantId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl fmt::Display for UserId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl fmt::Display for ConversationId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl fmt::Display for ChatMessageId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl fmt::Display for DeliveryId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}

impl From<&str> for TenantId {
  fn from(id: &str) -> Self {
    TenantId(id.to_string())
  }
}

impl From<String> for TenantId {
  fn from(id: String) -> Self {
    TenantId(id)
  }
}

impl From<i64> for UserId {
  fn from(id: i64) -> Self {
    UserId(id)
  }
}

impl From<i64> for ConversationId {
  fn from(id: i64) -> Self {
    ConversationId(id)
  }
}

impl From<i64> for ChatMessageId {
  fn from(id: i64) -> Self {
    ChatMessageId(id)
  }
}

impl From<UserId> for i64 {
  fn from(id: UserId) -> Self {
    id.0
  }
}

impl From<ConversationId> for i64 {
  fn from(id: ConversationId) -> Self {
    id.0
  }
}

impl From<ChatMessageId> for i64 {
  fn from(id: ChatMessageId) -> Self {
    id.0
  }
}
