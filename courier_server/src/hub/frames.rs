use courier_core::{ChatMessage, ChatMessageId, ConversationId, PresenceStatus, UserId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Frames a client may send on the chat socket (the notifications socket
/// only ever sends `ping`)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
  Ping,
  JoinConversation {
    conversation_id: ConversationId,
  },
  SendMessage {
    conversation_id: ConversationId,
    content: String,
    #[serde(default)]
    reply_to: Option<ChatMessageId>,
  },
  StartTyping {
    conversation_id: ConversationId,
  },
  StopTyping {
    conversation_id: ConversationId,
  },
  AddReaction {
    message_id: ChatMessageId,
    emoji: String,
  },
  RemoveReaction {
    message_id: ChatMessageId,
    emoji: String,
  },
  MarkRead {
    conversation_id: ConversationId,
  },
  UpdatePresence {
    status: PresenceStatus,
  },
}

/// Frames the server pushes to connected clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
  Pong,
  ConnectionEstablished {
    connection_id: u64,
    tenant_id: String,
  },
  Notification {
    payload: Value,
  },
  Broadcast {
    payload: Value,
  },
  UnreadCount {
    count: i64,
  },
  NewMessage {
    message: ChatMessage,
  },
  MessageUpdated {
    message: ChatMessage,
  },
  MessageDeleted {
    conversation_id: ConversationId,
    message_id: ChatMessageId,
  },
  ReactionAdded {
    message_id: ChatMessageId,
    user_id: UserId,
    emoji: String,
  },
  ReactionRemoved {
    message_id: ChatMessageId,
    user_id: UserId,
    emoji: String,
  },
  TypingIndicator {
    conversation_id: ConversationId,
    user_id: UserId,
    typing: bool,
  },
  PresenceChanged {
    user_id: UserId,
    status: PresenceStatus,
  },
  Error {
    message: String,
  },
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_client_frame_wire_format() {
    let frame: ClientFrame =
      serde_json::from_str(r#"{"type": "send_message", "conversation_id": 7, "content": "hi"}"#)
        .unwrap();

    match frame {
      ClientFrame::SendMessage {
        conversation_id,
        content,
        reply_to,
      } => {
        assert_eq!(conversation_id, ConversationId(7));
        assert_eq!(content, "hi");
        assert!(reply_to.is_none());
      }
      other => panic!("unexpected frame: {:?}", other),
    }
  }

  #[test]
  fn test_server_frame_tag() {
    let frame = ServerFrame::UnreadCount { count: 3 };
    let json = serde_json::to_value(&frame).unwrap();
    assert_eq!(json["type"], "unread_count");
    assert_eq!(json["count"], 3);
  }
}
