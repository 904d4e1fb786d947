pub mod branding;
pub mod channel;
pub mod chat;
pub mod credential;
pub mod delivery;
pub mod event;
pub mod ids;
pub mod template;

pub use branding::TenantBranding;
pub use channel::Channel;
pub use chat::{
  ChatConversation, ChatMessage, ChatMessageKind, ChatParticipant, ConversationKind,
  MessageReaction, ParticipantRole, PresenceStatus, UserPresence,
};
pub use credential::{secret_keys, Credential};
pub use delivery::{DeliveryRecord, DeliveryState, RenderedContent, DEFAULT_MAX_RETRIES};
pub use event::{EnvelopeError, EventEnvelope, EventMetadata};
pub use ids::{ChatMessageId, ConversationId, DeliveryId, TenantId, UserId};
pub use template::Template;
