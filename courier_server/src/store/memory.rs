//! In-memory store implementations, used by the test suite and by local
//! development without a database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
  ChatConversation, ChatMessage, ChatMessageId, ChatMessageKind, ChatParticipant, ConversationId,
  ConversationKind, CoreError, Credential, DeliveryId, DeliveryRecord, DeliveryState,
  FailureReason, ParticipantRole, PresenceStatus, Template, TenantId, UserId,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use super::chat::ChatStore;
use super::credentials::CredentialStore;
use super::deliveries::DeliveryStore;
use super::devices::DeviceStore;
use super::templates::TemplateStore;

#[derive(Default)]
pub struct MemoryDeliveryStore {
  records: Mutex<HashMap<DeliveryId, DeliveryRecord>>,
}

impl MemoryDeliveryStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn snapshot(&self) -> Vec<DeliveryRecord> {
    self.records.lock().unwrap().values().cloned().collect()
  }

  /// Test hook: reschedule a record so a worker picks it up immediately
  pub fn set_next_attempt(&self, id: DeliveryId, at: DateTime<Utc>) {
    if let Some(record) = self.records.lock().unwrap().get_mut(&id) {
      record.next_attempt_at = at;
    }
  }
}

#[async_trait]
impl DeliveryStore for MemoryDeliveryStore {
  async fn insert(&self, record: &DeliveryRecord) -> Result<bool, CoreError> {
    let mut records = self.records.lock().unwrap();

    if let Some(event_id) = &record.event_id {
      let duplicate = records.values().any(|existing| {
        existing.event_id.as_ref() == Some(event_id)
          && existing.tenant_id == record.tenant_id
          && existing.channel == record.channel
          && existing.recipient == record.recipient
      });
      if duplicate {
        return Ok(false);
      }
    }

    records.insert(record.id, record.clone());
    Ok(true)
  }

  async fn claim_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<DeliveryRecord>, CoreError> {
    let mut records = self.records.lock().unwrap();

    let mut due: Vec<(DateTime<Utc>, DeliveryId)> = records
      .values()
      .filter(|r| {
        r.state.is_in_flight()
          && r.next_attempt_at <= now
          && r.claimed_at.is_none()
          && r.deleted_at.is_none()
      })
      .map(|r| (r.next_attempt_at, r.id))
      .collect();
    due.sort_by_key(|(at, _)| *at);
    due.truncate(limit as usize);
    let due: Vec<DeliveryId> = due.into_iter().map(|(_, id)| id).collect();

    let mut claimed = Vec::with_capacity(due.len());
    for id in due {
      if let Some(record) = records.get_mut(&id) {
        record.claimed_at = Some(now);
        claimed.push(record.clone());
      }
    }
    Ok(claimed)
  }

  async fn mark_success(
    &self,
    id: DeliveryId,
    provider_response: Option<String>,
  ) -> Result<(), CoreError> {
    let mut records = self.records.lock().unwrap();
    if let Some(record) = records.get_mut(&id) {
      if record.state.is_in_flight() {
        record.state = DeliveryState::Success;
        record.sent_at = Some(Utc::now());
        record.provider_response = provider_response;
        record.claimed_at = None;
      }
    }
    Ok(())
  }

  async fn mark_retrying(
    &self,
    id: DeliveryId,
    reason: FailureReason,
    provider_response: Option<String>,
    next_attempt_at: DateTime<Utc>,
  ) -> Result<(), CoreError> {
    let mut records = self.records.lock().unwrap();
    if let Some(record) = records.get_mut(&id) {
      if record.state.is_in_flight() {
        record.state = DeliveryState::Retrying;
        record.retry_count += 1;
        record.failure_reason = Some(reason);
        record.provider_response = provider_response;
        record.next_attempt_at = next_attempt_at;
        record.claimed_at = None;
      }
    }
    Ok(())
  }

  async fn mark_failed(
    &self,
    id: DeliveryId,
    reason: FailureReason,
    provider_response: Option<String>,
  ) -> Result<(), CoreError> {
    let mut records = self.records.lock().unwrap();
    if let Some(record) = records.get_mut(&id) {
      if record.state.is_in_flight() {
        record.state = DeliveryState::Failed;
        record.failure_reason = Some(reason);
        record.provider_response = provider_response;
        record.claimed_at = None;
      }
    }
    Ok(())
  }

  async fn reclaim_stale(&self, older_than: DateTime<Utc>) -> Result<u64, CoreError> {
    let mut records = self.records.lock().unwrap();
    let mut reclaimed = 0;

    for record in records.values_mut() {
      if record.state.is_in_flight()
        && record.claimed_at.map(|at| at < older_than).unwrap_or(false)
      {
        record.state = DeliveryState::Retrying;
        record.retry_count += 1;
        record.claimed_at = None;
        reclaimed += 1;
      }
    }
    Ok(reclaimed)
  }

  async fn get(&self, id: DeliveryId) -> Result<Option<DeliveryRecord>, CoreError> {
    Ok(self.records.lock().unwrap().get(&id).cloned())
  }

  async fn unread_count(&self, tenant_id: &TenantId, recipient: &str) -> Result<i64, CoreError> {
    let records = self.records.lock().unwrap();
    Ok(
      records
        .values()
        .filter(|r| {
          r.tenant_id == *tenant_id
            && r.recipient == recipient
            && r.channel == courier_core::Channel::InApp
            && r.sent_at.is_none()
            && r.deleted_at.is_none()
        })
        .count() as i64,
    )
  }
}

#[derive(Default)]
pub struct MemoryTemplateStore {
  templates: Mutex<Vec<Template>>,
  next_id: AtomicI64,
}

impl MemoryTemplateStore {
  pub fn new() -> Self {
    Self {
      templates: Mutex::new(Vec::new()),
      next_id: AtomicI64::new(1),
    }
  }
}

#[async_trait]
impl TemplateStore for MemoryTemplateStore {
  async fn resolve(
    &self,
    tenant_id: &TenantId,
    name: &str,
    channel: courier_core::Channel,
  ) -> Result<Option<Template>, CoreError> {
    let templates = self.templates.lock().unwrap();
    Ok(
      templates
        .iter()
        .filter(|t| t.tenant_id == *tenant_id && t.name == name && t.channel == channel && t.active)
        .max_by_key(|t| t.version)
        .cloned(),
    )
  }

  async fn upsert(&self, mut template: Template) -> Result<Template, CoreError> {
    let mut templates = self.templates.lock().unwrap();

    let next_version = templates
      .iter()
      .filter(|t| {
        t.tenant_id == template.tenant_id
          && t.name == template.name
          && t.channel == template.channel
      })
      .map(|t| t.version)
      .max()
      .unwrap_or(0)
      + 1;

    for existing in templates.iter_mut() {
      if existing.tenant_id == template.tenant_id
        && existing.name == template.name
        && existing.channel == template.channel
      {
        existing.active = false;
      }
    }

    template.id = self.next_id.fetch_add(1, Ordering::SeqCst);
    template.version = next_version;
    template.active = true;
    templates.push(template.clone());
    Ok(template)
  }
}

#[derive(Default)]
pub struct MemoryCredentialStore {
  credentials: Mutex<Vec<Credential>>,
  next_id: AtomicI64,
}

impl MemoryCredentialStore {
  pub fn new() -> Self {
    Self {
      credentials: Mutex::new(Vec::new()),
      next_id: AtomicI64::new(1),
    }
  }

  /// Count of active rows per pair, used by invariant tests
  pub fn active_count(&self, tenant_id: &TenantId, channel: courier_core::Channel) -> usize {
    self
      .credentials
      .lock()
      .unwrap()
      .iter()
      .filter(|c| c.tenant_id == *tenant_id && c.channel == channel && c.active)
      .count()
  }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
  async fn active(
    &self,
    tenant_id: &TenantId,
    channel: courier_core::Channel,
  ) -> Result<Option<Credential>, CoreError> {
    let credentials = self.credentials.lock().unwrap();
    Ok(
      credentials
        .iter()
        .find(|c| c.tenant_id == *tenant_id && c.channel == channel && c.active)
        .cloned(),
    )
  }

  async fn create(
    &self,
    tenant_id: &TenantId,
    channel: courier_core::Channel,
    secrets: BTreeMap<String, String>,
    custom: bool,
  ) -> Result<Credential, CoreError> {
    let mut credentials = self.credentials.lock().unwrap();

    for existing in credentials.iter_mut() {
      if existing.tenant_id == *tenant_id && existing.channel == channel {
        existing.active = false;
      }
    }

    let credential = Credential {
      id: self.next_id.fetch_add(1, Ordering::SeqCst),
      tenant_id: tenant_id.clone(),
      channel,
      secrets,
      custom,
      active: true,
      created_at: Utc::now(),
    };
    credentials.push(credential.clone());
    Ok(credential)
  }
}

#[derive(Default)]
struct ChatState {
  conversations: HashMap<ConversationId, ChatConversation>,
  participants: Vec<ChatParticipant>,
  messages: HashMap<ChatMessageId, ChatMessage>,
  reactions: HashSet<(ChatMessageId, UserId, String)>,
  presence: HashMap<(TenantId, UserId), PresenceStatus>,
}

#[derive(Default)]
pub struct MemoryChatStore {
  state: Mutex<ChatState>,
  next_message_id: AtomicI64,
}

impl MemoryChatStore {
  pub fn new() -> Self {
    Self {
      state: Mutex::new(ChatState::default()),
      next_message_id: AtomicI64::new(1),
    }
  }

  pub fn seed_conversation(
    &self,
    conversation_id: ConversationId,
    tenant_id: TenantId,
    kind: ConversationKind,
    created_by: UserId,
  ) {
    let mut state = self.state.lock().unwrap();
    state.conversations.insert(
      conversation_id,
      ChatConversation {
        id: conversation_id,
        tenant_id,
        kind,
        title: None,
        created_by,
        created_at: Utc::now(),
        deleted_at: None,
      },
    );
  }

  pub fn seed_participant(
    &self,
    conversation_id: ConversationId,
    user_id: UserId,
    role: ParticipantRole,
  ) {
    let mut state = self.state.lock().unwrap();
    state.participants.push(ChatParticipant {
      conversation_id,
      user_id,
      role,
      joined_at: Utc::now(),
      last_seen_at: None,
      left_at: None,
    });
  }
}

#[async_trait]
impl ChatStore for MemoryChatStore {
  async fn conversation(
    &self,
    conversation_id: ConversationId,
  ) -> Result<Option<ChatConversation>, CoreError> {
    let state = self.state.lock().unwrap();
    Ok(
      state
        .conversations
        .get(&conversation_id)
        .filter(|c| c.deleted_at.is_none())
        .cloned(),
    )
  }

  async fn participant(
    &self,
    conversation_id: ConversationId,
    user_id: UserId,
  ) -> Result<Option<ChatParticipant>, CoreError> {
    let state = self.state.lock().unwrap();
    Ok(
      state
        .participants
        .iter()
        .find(|p| p.conversation_id == conversation_id && p.user_id == user_id)
        .cloned(),
    )
  }

  async fn message(&self, message_id: ChatMessageId) -> Result<Option<ChatMessage>, CoreError> {
    let state = self.state.lock().unwrap();
    Ok(state.messages.get(&message_id).cloned())
  }

  async fn create_message(
    &self,
    conversation_id: ConversationId,
    sender_id: UserId,
    kind: ChatMessageKind,
    content: &str,
    reply_to: Option<ChatMessageId>,
  ) -> Result<ChatMessage, CoreError> {
    let mut state = self.state.lock().unwrap();

    let is_active = state
      .participants
      .iter()
      .any(|p| p.conversation_id == conversation_id && p.user_id == sender_id && p.is_active());
    if !is_active {
      return Err(CoreError::Unauthorized(format!(
        "user {} is not an active participant of conversation {}",
        sender_id, conversation_id
      )));
    }

    let message = ChatMessage {
      id: ChatMessageId(self.next_message_id.fetch_add(1, Ordering::SeqCst)),
      conversation_id,
      sender_id,
      kind,
      content: content.to_string(),
      reply_to,
      created_at: Utc::now(),
      edited_at: None,
      deleted_at: None,
    };
    state.messages.insert(message.id, message.clone());
    Ok(message)
  }

  async fn edit_message(
    &self,
    message_id: ChatMessageId,
    editor_id: UserId,
    content: &str,
  ) -> Result<ChatMessage, CoreError> {
    let mut state = self.state.lock().unwrap();
    let message = state.messages.get_mut(&message_id);

    match message {
      Some(message) if message.sender_id == editor_id && message.deleted_at.is_none() => {
        message.content = content.to_string();
        message.edited_at = Some(Utc::now());
        Ok(message.clone())
      }
      _ => Err(CoreError::Unauthorized(format!(
        "message {} cannot be edited by user {}",
        message_id, editor_id
      ))),
    }
  }

  async fn delete_message(
    &self,
    message_id: ChatMessageId,
    deleter_id: UserId,
  ) -> Result<ChatMessage, CoreError> {
    let mut state = self.state.lock().unwrap();
    let message = state.messages.get_mut(&message_id);

    match message {
      Some(message) if message.sender_id == deleter_id && message.deleted_at.is_none() => {
        message.deleted_at = Some(Utc::now());
        Ok(message.clone())
      }
      _ => Err(CoreError::Unauthorized(format!(
        "message {} cannot be deleted by user {}",
        message_id, deleter_id
      ))),
    }
  }

  async fn add_reaction(
    &self,
    message_id: ChatMessageId,
    user_id: UserId,
    emoji: &str,
  ) -> Result<bool, CoreError> {
    let mut state = self.state.lock().unwrap();
    Ok(state.reactions.insert((message_id, user_id, emoji.to_string())))
  }

  async fn remove_reaction(
    &self,
    message_id: ChatMessageId,
    user_id: UserId,
    emoji: &str,
  ) -> Result<bool, CoreError> {
    let mut state = self.state.lock().unwrap();
    Ok(state.reactions.remove(&(message_id, user_id, emoji.to_string())))
  }

  async fn mark_read(
    &self,
    conversation_id: ConversationId,
    user_id: UserId,
  ) -> Result<(), CoreError> {
    let mut state = self.state.lock().unwrap();
    for participant in state.participants.iter_mut() {
      if participant.conversation_id == conversation_id && participant.user_id == user_id {
        participant.last_seen_at = Some(Utc::now());
      }
    }
    Ok(())
  }

  async fn update_presence(
    &self,
    tenant_id: &TenantId,
    user_id: UserId,
    status: PresenceStatus,
  ) -> Result<(), CoreError> {
    let mut state = self.state.lock().unwrap();
    state.presence.insert((tenant_id.clone(), user_id), status);
    Ok(())
  }
}

#[derive(Default)]
pub struct MemoryDeviceStore {
  // (tenant, token) -> (user, platform, active)
  tokens: Mutex<HashMap<(TenantId, String), (UserId, String, bool)>>,
}

impl MemoryDeviceStore {
  pub fn new() -> Self {
    Self::default()
  }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
  async fn register(
    &self,
    tenant_id: &TenantId,
    user_id: UserId,
    token: &str,
    platform: &str,
  ) -> Result<(), CoreError> {
    let mut tokens = self.tokens.lock().unwrap();
    tokens.insert(
      (tenant_id.clone(), token.to_string()),
      (user_id, platform.to_string(), true),
    );
    Ok(())
  }

  async fn active_tokens(
    &self,
    tenant_id: &TenantId,
    user_id: UserId,
  ) -> Result<Vec<String>, CoreError> {
    let tokens = self.tokens.lock().unwrap();
    Ok(
      tokens
        .iter()
        .filter(|((tenant, _), (user, _, active))| {
          tenant == tenant_id && *user == user_id && *active
        })
        .map(|((_, token), _)| token.clone())
        .collect(),
    )
  }

  async fn mark_inactive(&self, tenant_id: &TenantId, token: &str) -> Result<(), CoreError> {
    let mut tokens = self.tokens.lock().unwrap();
    if let Some(entry) = tokens.get_mut(&(tenant_id.clone(), token.to_string())) {
      entry.2 = false;
    }
    Ok(())
  }
}
