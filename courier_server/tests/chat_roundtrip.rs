//! Chat hub round-trip tests over an in-memory transport: join, send,
//! typing, reactions and the participant guards.

mod common;

use common::*;
use chrono::Utc;
use courier_core::{
  AccessClaims, ChatMessageKind, ConversationId, ConversationKind, ParticipantRole, TenantId,
  UserId,
};
use courier_server::hub::{handle_chat_frame, ClientFrame, ServerFrame};
use courier_server::store::ChatStore;
use std::time::Duration;

fn claims(user_id: UserId, tenant: &str) -> AccessClaims {
  let now = Utc::now().timestamp();
  AccessClaims {
    sub: user_id,
    tenant_id: TenantId::new(tenant),
    exp: now + 3600,
    iat: now,
  }
}

fn seeded_world() -> TestWorld {
  let world = test_world();
  let conversation = ConversationId(1);
  world.chat.seed_conversation(
    conversation,
    TenantId::new("T1"),
    ConversationKind::Group,
    UserId(1),
  );
  world
    .chat
    .seed_participant(conversation, UserId(1), ParticipantRole::Admin);
  world
    .chat
    .seed_participant(conversation, UserId(2), ParticipantRole::Member);
  world
}

#[tokio::test]
async fn send_message_fans_out_to_other_participants() {
  let world = seeded_world();
  let state = world.state.clone();
  let tenant = TenantId::new("T1");
  let conversation = ConversationId(1);

  let mut alice = state.hub.register(tenant.clone(), UserId(1));
  let mut bob = state.hub.register(tenant.clone(), UserId(2));

  for (registration, user) in [(&alice, UserId(1)), (&bob, UserId(2))] {
    assert!(
      handle_chat_frame(
        state.clone(),
        registration.id,
        claims(user, "T1"),
        ClientFrame::JoinConversation {
          conversation_id: conversation
        },
      )
      .await
    );
  }

  handle_chat_frame(
    state.clone(),
    alice.id,
    claims(UserId(1), "T1"),
    ClientFrame::SendMessage {
      conversation_id: conversation,
      content: "hi".to_string(),
      reply_to: None,
    },
  )
  .await;

  // The other participant sees the message within one broadcast hop
  let frame = tokio::time::timeout(Duration::from_millis(200), bob.rx.recv())
    .await
    .expect("no frame within 200ms")
    .expect("connection closed");

  match frame {
    ServerFrame::NewMessage { message } => {
      assert_eq!(message.content, "hi");
      assert_eq!(message.sender_id, UserId(1));
      assert_eq!(message.conversation_id, conversation);
      assert_eq!(message.kind, ChatMessageKind::Text);
    }
    other => panic!("expected new_message, got {:?}", other),
  }

  // The sender is not echoed its own message
  assert!(alice.rx.try_recv().is_err());
}

#[tokio::test]
async fn non_participant_cannot_send() {
  let world = seeded_world();
  let state = world.state.clone();
  let conversation = ConversationId(1);

  let mut mallory = state.hub.register(TenantId::new("T1"), UserId(99));

  handle_chat_frame(
    state.clone(),
    mallory.id,
    claims(UserId(99), "T1"),
    ClientFrame::SendMessage {
      conversation_id: conversation,
      content: "let me in".to_string(),
      reply_to: None,
    },
  )
  .await;

  match mallory.rx.recv().await.unwrap() {
    ServerFrame::Error { message } => {
      assert!(message.contains("not an active participant"));
    }
    other => panic!("expected error frame, got {:?}", other),
  }

  // Nothing was persisted
  assert!(world
    .chat
    .message(courier_core::ChatMessageId(1))
    .await
    .unwrap()
    .is_none());
}

#[tokio::test]
async fn conversation_is_invisible_across_tenants() {
  let world = seeded_world();
  let state = world.state.clone();

  let mut eve = state.hub.register(TenantId::new("T2"), UserId(1));

  handle_chat_frame(
    state.clone(),
    eve.id,
    claims(UserId(1), "T2"),
    ClientFrame::JoinConversation {
      conversation_id: ConversationId(1),
    },
  )
  .await;

  match eve.rx.recv().await.unwrap() {
    ServerFrame::Error { message } => assert!(message.contains("unknown conversation")),
    other => panic!("expected error frame, got {:?}", other),
  }
}

#[tokio::test]
async fn typing_indicator_excludes_the_typist() {
  let world = seeded_world();
  let state = world.state.clone();
  let conversation = ConversationId(1);

  let alice = state.hub.register(TenantId::new("T1"), UserId(1));
  let mut bob = state.hub.register(TenantId::new("T1"), UserId(2));
  state.hub.join_conversation(alice.id, conversation);
  state.hub.join_conversation(bob.id, conversation);

  handle_chat_frame(
    state.clone(),
    alice.id,
    claims(UserId(1), "T1"),
    ClientFrame::StartTyping {
      conversation_id: conversation,
    },
  )
  .await;

  match bob.rx.recv().await.unwrap() {
    ServerFrame::TypingIndicator { user_id, typing, .. } => {
      assert_eq!(user_id, UserId(1));
      assert!(typing);
    }
    other => panic!("expected typing indicator, got {:?}", other),
  }
}

#[tokio::test]
async fn reactions_are_unique_and_broadcast() {
  let world = seeded_world();
  let state = world.state.clone();
  let conversation = ConversationId(1);

  let message = world
    .chat
    .create_message(conversation, UserId(1), ChatMessageKind::Text, "hello", None)
    .await
    .unwrap();

  let alice = state.hub.register(TenantId::new("T1"), UserId(1));
  let mut bob = state.hub.register(TenantId::new("T1"), UserId(2));
  state.hub.join_conversation(alice.id, conversation);
  state.hub.join_conversation(bob.id, conversation);

  for _ in 0..2 {
    handle_chat_frame(
      state.clone(),
      alice.id,
      claims(UserId(1), "T1"),
      ClientFrame::AddReaction {
        message_id: message.id,
        emoji: "🎉".to_string(),
      },
    )
    .await;
  }

  // The duplicate reaction is dropped, so exactly one frame arrives
  match bob.rx.recv().await.unwrap() {
    ServerFrame::ReactionAdded { message_id, user_id, emoji } => {
      assert_eq!(message_id, message.id);
      assert_eq!(user_id, UserId(1));
      assert_eq!(emoji, "🎉");
    }
    other => panic!("expected reaction_added, got {:?}", other),
  }
  assert!(bob.rx.try_recv().is_err());
}

#[tokio::test]
async fn message_edits_are_author_only() {
  let world = seeded_world();
  let message = world
    .chat
    .create_message(ConversationId(1), UserId(1), ChatMessageKind::Text, "v1", None)
    .await
    .unwrap();

  assert!(world
    .chat
    .edit_message(message.id, UserId(2), "hijacked")
    .await
    .is_err());

  let edited = world.chat.edit_message(message.id, UserId(1), "v2").await.unwrap();
  assert_eq!(edited.content, "v2");
  assert!(edited.edited_at.is_some());
}

#[tokio::test]
async fn deleted_messages_are_soft_deleted() {
  let world = seeded_world();
  let message = world
    .chat
    .create_message(ConversationId(1), UserId(1), ChatMessageKind::Text, "bye", None)
    .await
    .unwrap();

  world.chat.delete_message(message.id, UserId(1)).await.unwrap();

  // The row survives with the soft-delete marker, so reply pointers and
  // reaction totals stay valid
  let stored = world.chat.message(message.id).await.unwrap().unwrap();
  assert!(stored.deleted_at.is_some());
}

#[tokio::test]
async fn mark_read_advances_last_seen() {
  let world = seeded_world();
  let state = world.state.clone();
  let conversation = ConversationId(1);

  let alice = state.hub.register(TenantId::new("T1"), UserId(1));
  handle_chat_frame(
    state.clone(),
    alice.id,
    claims(UserId(1), "T1"),
    ClientFrame::MarkRead {
      conversation_id: conversation,
    },
  )
  .await;

  let participant = world
    .chat
    .participant(conversation, UserId(1))
    .await
    .unwrap()
    .unwrap();
  assert!(participant.last_seen_at.is_some());
}

#[tokio::test]
async fn token_claims_gate_tenant_access() {
  let world = test_world();
  let state = world.state.clone();

  let token = state.issue_token(UserId(7), TenantId::new("T1")).unwrap();

  use courier_core::TokenVerifier;
  let claims = state.verify_token(&token).unwrap();
  assert_eq!(claims.sub, UserId(7));
  assert_eq!(claims.tenant_id, TenantId::new("T1"));

  assert!(state.verify_token("garbage").is_err());
}
