use courier_core::{Channel, EventEnvelope};

use super::super::registry::{payload_user_id, EventHandler, RecipientSpec, Route};

/// Application events: billing, task assignment and social notifications.
pub struct ApplicationHandler;

impl EventHandler for ApplicationHandler {
  fn event_types(&self) -> &'static [&'static str] {
    &[
      "invoice.payment.failed",
      "task.assigned",
      "comment.mentioned",
      "content.liked",
    ]
  }

  fn routes(&self, event: &EventEnvelope) -> Vec<Route> {
    let mut routes = Vec::new();
    let user_id = payload_user_id(&event.payload, "user_id");

    match event.event_type.as_str() {
      "invoice.payment.failed" => {
        if let Some(email) = event.payload_str("email") {
          routes.push(Route::new(
            Channel::Email,
            RecipientSpec::Address(email.to_string()),
          ));
        }
        if let Some(user_id) = user_id {
          routes.push(Route::new(Channel::InApp, RecipientSpec::User(user_id)));
        }
      }
      "task.assigned" => {
        let assignee = payload_user_id(&event.payload, "assignee_id").or(user_id);
        if let Some(assignee) = assignee {
          routes.push(Route::new(Channel::Push, RecipientSpec::UserDevices(assignee)));
          routes.push(Route::new(Channel::InApp, RecipientSpec::User(assignee)));
        }
      }
      "comment.mentioned" => {
        if let Some(user_id) = user_id {
          routes.push(Route::new(Channel::Push, RecipientSpec::UserDevices(user_id)));
          routes.push(Route::new(Channel::InApp, RecipientSpec::User(user_id)));
        }
      }
      "content.liked" => {
        if let Some(user_id) = user_id {
          routes.push(Route::new(Channel::InApp, RecipientSpec::User(user_id)));
        }
      }
      _ => {}
    }

    routes
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use courier_core::{TenantId, UserId};
  use serde_json::json;

  #[test]
  fn test_task_assigned_targets_assignee_devices() {
    let handler = ApplicationHandler;
    let envelope = EventEnvelope {
      event_type: "task.assigned".into(),
      tenant_id: TenantId::new("t1"),
      timestamp: chrono::Utc::now(),
      payload: json!({"assignee_id": 12, "task_title": "Ship it", "task_id": "T-9"})
        .as_object()
        .unwrap()
        .clone(),
      metadata: Default::default(),
    };

    let routes = handler.routes(&envelope);
    assert_eq!(routes.len(), 2);
    assert_eq!(routes[0].channel, Channel::Push);
    assert_eq!(routes[0].recipient, RecipientSpec::UserDevices(UserId(12)));
    assert_eq!(routes[1].channel, Channel::InApp);
  }
}
