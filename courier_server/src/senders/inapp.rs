use async_trait::async_trait;
use courier_core::{Channel, Credential, DeliveryRecord, FailureReason, UserId};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::{ChannelSender, SendOutcome};
use crate::hub::{Hub, ServerFrame};
use crate::observability::metrics::HubMetrics;
use crate::store::DeliveryStore;

/// In-app sender: the persisted record is the durable copy; delivery here
/// means broadcasting to whatever connections the recipient currently
/// holds. An offline recipient is still a success - the record stays
/// retrievable through the admin surface.
pub struct InAppSender {
  hub: Arc<Hub>,
  deliveries: Arc<dyn DeliveryStore>,
}

impl InAppSender {
  pub fn new(hub: Arc<Hub>, deliveries: Arc<dyn DeliveryStore>) -> Self {
    Self { hub, deliveries }
  }
}

#[async_trait]
impl ChannelSender for InAppSender {
  fn channel(&self) -> Channel {
    Channel::InApp
  }

  async fn send(&self, _credential: Option<&Credential>, record: &DeliveryRecord) -> SendOutcome {
    let user_id: UserId = match record.recipient.parse::<i64>() {
      Ok(id) => UserId(id),
      Err(_) => {
        return SendOutcome::failure(
          FailureReason::ContentError,
          Some(format!("in-app recipient is not a user id: {}", record.recipient)),
        );
      }
    };

    let frame = ServerFrame::Notification {
      payload: json!({
        "id": record.id,
        "subject": record.content.subject,
        "body": record.content.body,
        "data": record.content.data,
        "created_at": record.created_at,
      }),
    };

    let sent = self.hub.send_to_user(&record.tenant_id, user_id, &frame);
    HubMetrics::broadcast(sent);

    if sent > 0 {
      if let Ok(count) = self
        .deliveries
        .unread_count(&record.tenant_id, &record.recipient)
        .await
      {
        self
          .hub
          .send_to_user(&record.tenant_id, user_id, &ServerFrame::UnreadCount { count });
      }
    } else {
      debug!(record = %record.id, user = %user_id, "recipient offline; record kept for pull");
    }

    SendOutcome::success(Some(format!("delivered to {} connections", sent)))
  }
}
