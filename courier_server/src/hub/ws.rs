use axum::{
  extract::{
    ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    Path, Query, State,
  },
  response::Response,
};
use courier_core::{
  AccessClaims, ChatMessageKind, PresenceStatus, TenantId, TokenVerifier, UserId,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{close, ClientFrame, Registration, ServerFrame};
use crate::observability::metrics::HubMetrics;
use crate::state::AppState;

/// Clients ping about every 30 s; a connection quiet for more than twice
/// that is assumed dead
const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
  token: Option<String>,
}

/// `/ws/notifications/{tenant}/?token=<jwt>`
pub async fn notifications_ws_handler(
  State(state): State<AppState>,
  Path(tenant_id): Path<String>,
  Query(query): Query<TokenQuery>,
  ws: WebSocketUpgrade,
) -> Response {
  let tenant_id = TenantId::new(tenant_id);
  ws.on_upgrade(move |socket| async move {
    if let Some(claims) = authenticate(&state, socket, &tenant_id, query.token).await {
      let (socket, claims) = claims;
      notifications_socket(state, tenant_id, claims, socket).await;
    }
  })
}

/// `/ws/chat/{tenant}/?token=<jwt>`
pub async fn chat_ws_handler(
  State(state): State<AppState>,
  Path(tenant_id): Path<String>,
  Query(query): Query<TokenQuery>,
  ws: WebSocketUpgrade,
) -> Response {
  let tenant_id = TenantId::new(tenant_id);
  ws.on_upgrade(move |socket| async move {
    if let Some(claims) = authenticate(&state, socket, &tenant_id, query.token).await {
      let (socket, claims) = claims;
      chat_socket(state, tenant_id, claims, socket).await;
    }
  })
}

/// Validate the token against the path tenant. On any failure the socket is
/// closed with a policy close code and `None` is returned.
async fn authenticate(
  state: &AppState,
  mut socket: WebSocket,
  tenant_id: &TenantId,
  token: Option<String>,
) -> Option<(WebSocket, AccessClaims)> {
  let rejection = match token {
    None => Some("missing token"),
    Some(token) => match state.verify_token(&token) {
      Err(_) => Some("invalid token"),
      Ok(claims) if claims.tenant_id != *tenant_id => Some("tenant mismatch"),
      Ok(claims) => return Some((socket, claims)),
    },
  };

  if let Some(reason) = rejection {
    warn!(tenant = %tenant_id, "rejecting websocket: {}", reason);
    let _ = socket
      .send(Message::Close(Some(CloseFrame {
        code: close::POLICY,
        reason: reason.into(),
      })))
      .await;
  }
  None
}

async fn notifications_socket(
  state: AppState,
  tenant_id: TenantId,
  claims: AccessClaims,
  socket: WebSocket,
) {
  let registration = state.hub.register(tenant_id.clone(), claims.sub);
  let id = registration.id;
  HubMetrics::connected("notifications");

  state.hub.send_to_connection(
    id,
    ServerFrame::ConnectionEstablished {
      connection_id: id.0,
      tenant_id: tenant_id.to_string(),
    },
  );

  // Pending in-app records are surfaced immediately on connect
  if let Ok(count) = state
    .deliveries
    .unread_count(&tenant_id, &claims.sub.to_string())
    .await
  {
    state.hub.send_to_connection(id, ServerFrame::UnreadCount { count });
  }

  let (sink, stream) = socket.split();
  let writer = tokio::spawn(write_loop(sink, registration));

  // The notifications socket only speaks ping/pong; everything else is
  // rejected by the shared read loop
  read_loop(&state, id, &claims, stream, |_state, _id, _claims, _frame| async move { false }).await;

  state.hub.unregister(id);
  let _ = writer.await;
  HubMetrics::disconnected("notifications");
}

async fn chat_socket(state: AppState, tenant_id: TenantId, claims: AccessClaims, socket: WebSocket) {
  let registration = state.hub.register(tenant_id.clone(), claims.sub);
  let id = registration.id;
  HubMetrics::connected("chat");

  state.hub.send_to_connection(
    id,
    ServerFrame::ConnectionEstablished {
      connection_id: id.0,
      tenant_id: tenant_id.to_string(),
    },
  );

  let _ = state
    .chat
    .update_presence(&tenant_id, claims.sub, PresenceStatus::Online)
    .await;

  let (sink, stream) = socket.split();
  let writer = tokio::spawn(write_loop(sink, registration));

  read_loop(&state, id, &claims, stream, handle_chat_frame).await;

  state.hub.unregister(id);
  let _ = state
    .chat
    .update_presence(&tenant_id, claims.sub, PresenceStatus::Offline)
    .await;
  let _ = writer.await;
  HubMetrics::disconnected("chat");
}

/// Serialize hub frames onto the socket; on close, emit the close code the
/// hub recorded (normal, going-away, policy or back-pressure).
async fn write_loop(
  mut sink: futures::stream::SplitSink<WebSocket, Message>,
  registration: Registration,
) {
  let Registration {
    mut rx,
    closing,
    close_code,
    ..
  } = registration;

  loop {
    tokio::select! {
      _ = closing.cancelled() => {
        let code = close_code.load(std::sync::atomic::Ordering::SeqCst);
        let _ = sink
          .send(Message::Close(Some(CloseFrame {
            code,
            reason: "".into(),
          })))
          .await;
        break;
      }
      frame = rx.recv() => {
        match frame {
          Some(frame) => {
            let text = match serde_json::to_string(&frame) {
              Ok(text) => text,
              Err(e) => {
                warn!("failed to serialize frame: {}", e);
                continue;
              }
            };
            if sink.send(Message::Text(text.into())).await.is_err() {
              break;
            }
          }
          None => break,
        }
      }
    }
  }
}

/// Drive the inbound side of a connection: parse frames, answer pings, and
/// hand everything else to the per-socket handler. Enforces the idle
/// timeout.
async fn read_loop<F, Fut>(
  state: &AppState,
  id: super::ConnectionId,
  claims: &AccessClaims,
  mut stream: futures::stream::SplitStream<WebSocket>,
  handler: F,
) where
  F: Fn(AppState, super::ConnectionId, AccessClaims, ClientFrame) -> Fut,
  Fut: std::future::Future<Output = bool>,
{
  loop {
    let message = match tokio::time::timeout(IDLE_TIMEOUT, stream.next()).await {
      Ok(message) => message,
      Err(_) => {
        debug!(connection = %id, "closing idle connection");
        break;
      }
    };

    match message {
      Some(Ok(Message::Text(text))) => {
        let frame: ClientFrame = match serde_json::from_str(&text) {
          Ok(frame) => frame,
          Err(e) => {
            state.hub.send_to_connection(
              id,
              ServerFrame::Error {
                message: format!("unrecognized frame: {}", e),
              },
            );
            continue;
          }
        };

        if matches!(frame, ClientFrame::Ping) {
          state.hub.send_to_connection(id, ServerFrame::Pong);
          continue;
        }

        if !handler(state.clone(), id, claims.clone(), frame).await {
          state.hub.send_to_connection(
            id,
            ServerFrame::Error {
              message: "unsupported frame on this socket".to_string(),
            },
          );
        }
      }
      Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {}
      Some(Ok(Message::Close(_))) | None => break,
      Some(Ok(_)) => {}
      Some(Err(e)) => {
        debug!(connection = %id, "websocket error: {}", e);
        break;
      }
    }
  }
}

/// Process one chat frame. Returns false for frames the chat socket does
/// not accept.
pub async fn handle_chat_frame(
  state: AppState,
  id: super::ConnectionId,
  claims: AccessClaims,
  frame: ClientFrame,
) -> bool {
  let user_id = claims.sub;
  let tenant_id = claims.tenant_id.clone();

  match frame {
    ClientFrame::Ping => {
      state.hub.send_to_connection(id, ServerFrame::Pong);
    }
    ClientFrame::JoinConversation { conversation_id } => {
      match participant_in_tenant(&state, &tenant_id, conversation_id, user_id).await {
        Ok(()) => {
          state.hub.join_conversation(id, conversation_id);
          info!(connection = %id, conversation = %conversation_id, "client joined conversation");
        }
        Err(message) => {
          state.hub.send_to_connection(id, ServerFrame::Error { message });
        }
      }
    }
    ClientFrame::SendMessage {
      conversation_id,
      content,
      reply_to,
    } => {
      match participant_in_tenant(&state, &tenant_id, conversation_id, user_id).await {
        Ok(()) => match state
          .chat
          .create_message(conversation_id, user_id, ChatMessageKind::Text, &content, reply_to)
          .await
        {
          Ok(message) => {
            let sent = state.hub.broadcast_conversation(
              conversation_id,
              &ServerFrame::NewMessage { message },
              Some(id),
            );
            HubMetrics::broadcast(sent);
          }
          Err(e) => {
            state
              .hub
              .send_to_connection(id, ServerFrame::Error { message: e.to_string() });
          }
        },
        Err(message) => {
          state.hub.send_to_connection(id, ServerFrame::Error { message });
        }
      }
    }
    ClientFrame::StartTyping { conversation_id } => {
      typing_indicator(&state, &tenant_id, id, conversation_id, user_id, true).await;
    }
    ClientFrame::StopTyping { conversation_id } => {
      typing_indicator(&state, &tenant_id, id, conversation_id, user_id, false).await;
    }
    ClientFrame::AddReaction { message_id, emoji } => {
      let message = match reactable_message(&state, &tenant_id, message_id, user_id).await {
        Ok(message) => message,
        Err(message) => {
          state.hub.send_to_connection(id, ServerFrame::Error { message });
          return true;
        }
      };

      match state.chat.add_reaction(message_id, user_id, &emoji).await {
        Ok(true) => {
          state.hub.broadcast_conversation(
            message.conversation_id,
            &ServerFrame::ReactionAdded {
              message_id,
              user_id,
              emoji,
            },
            None,
          );
        }
        // Duplicate reaction: the unique triple already exists
        Ok(false) => {}
        Err(e) => {
          state
            .hub
            .send_to_connection(id, ServerFrame::Error { message: e.to_string() });
        }
      }
    }
    ClientFrame::RemoveReaction { message_id, emoji } => {
      if let Ok(message) = reactable_message(&state, &tenant_id, message_id, user_id).await {
        if let Ok(true) = state.chat.remove_reaction(message_id, user_id, &emoji).await {
          state.hub.broadcast_conversation(
            message.conversation_id,
            &ServerFrame::ReactionRemoved {
              message_id,
              user_id,
              emoji,
            },
            None,
          );
        }
      }
    }
    ClientFrame::MarkRead { conversation_id } => {
      if let Err(e) = state.chat.mark_read(conversation_id, user_id).await {
        debug!(connection = %id, "mark_read failed: {}", e);
      }
    }
    ClientFrame::UpdatePresence { status } => {
      if state
        .chat
        .update_presence(&tenant_id, user_id, status)
        .await
        .is_ok()
      {
        state
          .hub
          .broadcast_tenant(&tenant_id, &ServerFrame::PresenceChanged { user_id, status });
      }
    }
  }

  true
}

/// Resolve a message for a reaction: it must exist and the reactor must be
/// an active participant of its conversation within the path tenant.
async fn reactable_message(
  state: &AppState,
  tenant_id: &TenantId,
  message_id: courier_core::ChatMessageId,
  user_id: UserId,
) -> Result<courier_core::ChatMessage, String> {
  let message = state
    .chat
    .message(message_id)
    .await
    .map_err(|e| e.to_string())?
    .ok_or_else(|| format!("unknown message {}", message_id))?;

  participant_in_tenant(state, tenant_id, message.conversation_id, user_id).await?;
  Ok(message)
}

async fn typing_indicator(
  state: &AppState,
  tenant_id: &TenantId,
  id: super::ConnectionId,
  conversation_id: courier_core::ConversationId,
  user_id: UserId,
  typing: bool,
) {
  if participant_in_tenant(state, tenant_id, conversation_id, user_id)
    .await
    .is_ok()
  {
    state.hub.broadcast_conversation(
      conversation_id,
      &ServerFrame::TypingIndicator {
        conversation_id,
        user_id,
        typing,
      },
      Some(id),
    );
  }
}

/// A client may act on a conversation only when it belongs to the path
/// tenant and the user holds an active participant row.
async fn participant_in_tenant(
  state: &AppState,
  tenant_id: &TenantId,
  conversation_id: courier_core::ConversationId,
  user_id: UserId,
) -> Result<(), String> {
  let conversation = state
    .chat
    .conversation(conversation_id)
    .await
    .map_err(|e| e.to_string())?
    .ok_or_else(|| format!("unknown conversation {}", conversation_id))?;

  if conversation.tenant_id != *tenant_id {
    return Err(format!("unknown conversation {}", conversation_id));
  }

  let participant = state
    .chat
    .participant(conversation_id, user_id)
    .await
    .map_err(|e| e.to_string())?;

  match participant {
    Some(participant) if participant.is_active() => Ok(()),
    _ => Err(format!(
      "not an active participant of conversation {}",
      conversation_id
    )),
  }
}
