//! WebSocket hub: per-tenant connection groups with a second level of
//! grouping by conversation for chat traffic.
//!
//! Writes to a single connection are serialized through a bounded per-
//! connection buffer; a slow client whose buffer fills is force-closed with
//! a back-pressure close code so it can never stall a broadcast to the rest
//! of the group.

pub mod frames;
pub mod ws;

pub use frames::{ClientFrame, ServerFrame};
pub use ws::{chat_ws_handler, handle_chat_frame, notifications_ws_handler};

use courier_core::{ConversationId, TenantId, UserId};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU16, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-connection outbound buffer; a full buffer marks the client as too
/// slow and forces a close
pub const CONNECTION_BUFFER: usize = 256;

/// Close codes used by the hub
pub mod close {
  /// Normal closure
  pub const NORMAL: u16 = 1000;
  /// Server is shutting down
  pub const GOING_AWAY: u16 = 1001;
  /// Token missing/malformed or tenant mismatch
  pub const POLICY: u16 = 1008;
  /// Back-pressure: the client drained its buffer too slowly
  pub const TRY_AGAIN: u16 = 1013;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

struct ConnectionHandle {
  tenant_id: TenantId,
  user_id: UserId,
  tx: mpsc::Sender<ServerFrame>,
  closing: CancellationToken,
  close_code: Arc<AtomicU16>,
}

/// Handed to the connection's writer task by `register`
pub struct Registration {
  pub id: ConnectionId,
  pub rx: mpsc::Receiver<ServerFrame>,
  pub closing: CancellationToken,
  pub close_code: Arc<AtomicU16>,
}

#[derive(Default)]
pub struct Hub {
  connections: DashMap<ConnectionId, ConnectionHandle>,
  tenant_groups: DashMap<TenantId, HashSet<ConnectionId>>,
  conversation_groups: DashMap<ConversationId, HashSet<ConnectionId>>,
  next_id: AtomicU64,
}

impl Hub {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a connection to its tenant group
  pub fn register(&self, tenant_id: TenantId, user_id: UserId) -> Registration {
    let id = ConnectionId(self.next_id.fetch_add(1, Ordering::SeqCst));
    let (tx, rx) = mpsc::channel(CONNECTION_BUFFER);
    let closing = CancellationToken::new();
    let close_code = Arc::new(AtomicU16::new(close::NORMAL));

    self.connections.insert(
      id,
      ConnectionHandle {
        tenant_id: tenant_id.clone(),
        user_id,
        tx,
        closing: closing.clone(),
        close_code: close_code.clone(),
      },
    );
    self.tenant_groups.entry(tenant_id.clone()).or_default().insert(id);

    info!(connection = %id, tenant = %tenant_id, user = %user_id, "connection joined tenant group");
    Registration {
      id,
      rx,
      closing,
      close_code,
    }
  }

  /// Drop a connection from every group with a normal close
  pub fn unregister(&self, id: ConnectionId) {
    self.unregister_with(id, close::NORMAL);
  }

  /// Drop a connection from every group, signalling the writer task to
  /// close with the given code
  pub fn unregister_with(&self, id: ConnectionId, code: u16) {
    if let Some((_, handle)) = self.connections.remove(&id) {
      handle.close_code.store(code, Ordering::SeqCst);
      handle.closing.cancel();
      if let Some(mut group) = self.tenant_groups.get_mut(&handle.tenant_id) {
        group.remove(&id);
      }
      info!(connection = %id, tenant = %handle.tenant_id, code, "connection left tenant group");
    }

    for mut group in self.conversation_groups.iter_mut() {
      group.remove(&id);
    }
  }

  /// Close every connection, used on shutdown
  pub fn close_all(&self, code: u16) {
    let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
    for id in ids {
      self.unregister_with(id, code);
    }
  }

  /// Subscribe a connection to a conversation's message traffic
  pub fn join_conversation(&self, id: ConnectionId, conversation_id: ConversationId) {
    self
      .conversation_groups
      .entry(conversation_id)
      .or_default()
      .insert(id);
    debug!(connection = %id, conversation = %conversation_id, "joined conversation group");
  }

  /// Deliver a frame to one connection. Returns false (and force-closes)
  /// when the client's buffer is full or the connection is gone.
  pub fn send_to_connection(&self, id: ConnectionId, frame: ServerFrame) -> bool {
    let Some(handle) = self.connections.get(&id) else {
      return false;
    };

    match handle.tx.try_send(frame) {
      Ok(()) => true,
      Err(mpsc::error::TrySendError::Full(_)) => {
        drop(handle);
        warn!(connection = %id, "outbound buffer full; force-closing slow client");
        self.unregister_with(id, close::TRY_AGAIN);
        false
      }
      Err(mpsc::error::TrySendError::Closed(_)) => {
        drop(handle);
        self.unregister(id);
        false
      }
    }
  }

  /// Internal publish operation: forward a frame to every connection in the
  /// tenant group.
  pub fn broadcast_tenant(&self, tenant_id: &TenantId, frame: &ServerFrame) -> usize {
    let Some(group) = self.tenant_groups.get(tenant_id) else {
      return 0;
    };
    let members: Vec<ConnectionId> = group.iter().copied().collect();
    drop(group);

    let mut sent = 0;
    for id in members {
      if self.send_to_connection(id, frame.clone()) {
        sent += 1;
      }
    }
    sent
  }

  /// Forward a frame to every connection subscribed to the conversation,
  /// optionally excluding the originating connection.
  pub fn broadcast_conversation(
    &self,
    conversation_id: ConversationId,
    frame: &ServerFrame,
    exclude: Option<ConnectionId>,
  ) -> usize {
    let Some(group) = self.conversation_groups.get(&conversation_id) else {
      return 0;
    };
    let members: Vec<ConnectionId> = group.iter().copied().collect();
    drop(group);

    let mut sent = 0;
    for id in members {
      if Some(id) == exclude {
        continue;
      }
      if self.send_to_connection(id, frame.clone()) {
        sent += 1;
      }
    }
    sent
  }

  /// Deliver a frame to every connection a user holds within a tenant
  pub fn send_to_user(&self, tenant_id: &TenantId, user_id: UserId, frame: &ServerFrame) -> usize {
    let Some(group) = self.tenant_groups.get(tenant_id) else {
      return 0;
    };
    let members: Vec<ConnectionId> = group
      .iter()
      .copied()
      .filter(|id| {
        self
          .connections
          .get(id)
          .map(|handle| handle.user_id == user_id)
          .unwrap_or(false)
      })
      .collect();
    drop(group);

    let mut sent = 0;
    for id in members {
      if self.send_to_connection(id, frame.clone()) {
        sent += 1;
      }
    }
    sent
  }

  pub fn connection_count(&self) -> usize {
    self.connections.len()
  }

  pub fn tenant_connection_count(&self, tenant_id: &TenantId) -> usize {
    self
      .tenant_groups
      .get(tenant_id)
      .map(|group| group.len())
      .unwrap_or(0)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_tenant_broadcast_reaches_only_tenant_group() {
    let hub = Hub::new();
    let t1 = TenantId::new("t1");
    let t2 = TenantId::new("t2");

    let mut a = hub.register(t1.clone(), UserId(1));
    let mut b = hub.register(t1.clone(), UserId(2));
    let mut c = hub.register(t2.clone(), UserId(3));

    let sent = hub.broadcast_tenant(&t1, &ServerFrame::Broadcast { payload: json!({"k": 1}) });
    assert_eq!(sent, 2);

    assert!(matches!(a.rx.recv().await, Some(ServerFrame::Broadcast { .. })));
    assert!(matches!(b.rx.recv().await, Some(ServerFrame::Broadcast { .. })));
    assert!(c.rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_conversation_broadcast_requires_join() {
    let hub = Hub::new();
    let t1 = TenantId::new("t1");
    let conversation = ConversationId(9);

    let a = hub.register(t1.clone(), UserId(1));
    let mut b = hub.register(t1.clone(), UserId(2));
    let mut c = hub.register(t1.clone(), UserId(3));

    hub.join_conversation(a.id, conversation);
    hub.join_conversation(b.id, conversation);

    let sent = hub.broadcast_conversation(
      conversation,
      &ServerFrame::TypingIndicator {
        conversation_id: conversation,
        user_id: UserId(1),
        typing: true,
      },
      Some(a.id),
    );

    // Only B: A is excluded as the origin, C never joined
    assert_eq!(sent, 1);
    assert!(matches!(
      b.rx.recv().await,
      Some(ServerFrame::TypingIndicator { typing: true, .. })
    ));
    assert!(c.rx.try_recv().is_err());
  }

  #[tokio::test]
  async fn test_slow_client_is_force_closed_without_blocking_others() {
    let hub = Hub::new();
    let t1 = TenantId::new("t1");

    let slow = hub.register(t1.clone(), UserId(1));
    let mut fast = hub.register(t1.clone(), UserId(2));

    // Fill the slow client's buffer without draining it
    for _ in 0..CONNECTION_BUFFER {
      assert!(hub.send_to_connection(slow.id, ServerFrame::Pong));
    }

    let sent = hub.broadcast_tenant(&t1, &ServerFrame::Broadcast { payload: json!({}) });

    // The slow client is dropped with the back-pressure code; the fast one
    // still got the frame
    assert_eq!(sent, 1);
    assert_eq!(hub.tenant_connection_count(&t1), 1);
    assert!(slow.closing.is_cancelled());
    assert_eq!(slow.close_code.load(Ordering::SeqCst), close::TRY_AGAIN);

    loop {
      match fast.rx.recv().await {
        Some(ServerFrame::Broadcast { .. }) => break,
        Some(_) => continue,
        None => panic!("fast client lost its connection"),
      }
    }
  }

  #[tokio::test]
  async fn test_close_all_signals_going_away() {
    let hub = Hub::new();
    let t1 = TenantId::new("t1");
    let a = hub.register(t1.clone(), UserId(1));
    let b = hub.register(t1.clone(), UserId(2));

    hub.close_all(close::GOING_AWAY);

    assert_eq!(hub.connection_count(), 0);
    for registration in [a, b] {
      assert!(registration.closing.is_cancelled());
      assert_eq!(
        registration.close_code.load(Ordering::SeqCst),
        close::GOING_AWAY
      );
    }
  }

  #[tokio::test]
  async fn test_unregister_removes_from_conversation_groups() {
    let hub = Hub::new();
    let t1 = TenantId::new("t1");
    let conversation = ConversationId(4);

    let a = hub.register(t1.clone(), UserId(1));
    hub.join_conversation(a.id, conversation);
    hub.unregister(a.id);

    assert_eq!(
      hub.broadcast_conversation(conversation, &ServerFrame::Pong, None),
      0
    );
    assert_eq!(hub.connection_count(), 0);
  }
}
