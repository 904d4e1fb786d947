use courier_core::{Channel, EventEnvelope};

use super::super::registry::{payload_user_id, EventHandler, RecipientSpec, Route};

/// Authentication lifecycle events: registration, password reset and
/// sign-in notifications.
pub struct AuthHandler;

impl EventHandler for AuthHandler {
  fn event_types(&self) -> &'static [&'static str] {
    &[
      "user.registration.completed",
      "user.password.reset.requested",
      "user.login.succeeded",
      "user.login.failed",
    ]
  }

  fn routes(&self, event: &EventEnvelope) -> Vec<Route> {
    let mut routes = Vec::new();
    let email = event.payload_str("email");
    let user_id = payload_user_id(&event.payload, "user_id");

    match event.event_type.as_str() {
      "user.registration.completed" => {
        if let Some(email) = email {
          routes.push(Route::new(
            Channel::Email,
            RecipientSpec::Address(email.to_string()),
          ));
        }
        if let Some(user_id) = user_id {
          routes.push(Route::new(Channel::InApp, RecipientSpec::User(user_id)));
        }
      }
      "user.password.reset.requested" => {
        if let Some(email) = email {
          routes.push(Route::new(
            Channel::Email,
            RecipientSpec::Address(email.to_string()),
          ));
        }
      }
      "user.login.succeeded" => {
        if let Some(user_id) = user_id {
          routes.push(Route::new(Channel::InApp, RecipientSpec::User(user_id)));
        }
      }
      "user.login.failed" => {
        if let Some(email) = email {
          routes.push(Route::new(
            Channel::Email,
            RecipientSpec::Address(email.to_string()),
          ));
        }
        if let Some(phone) = event.payload_str("phone") {
          routes.push(Route::new(
            Channel::Sms,
            RecipientSpec::Address(phone.to_string()),
          ));
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

  fn envelope(event_type: &str, payload: serde_json::Value) -> EventEnvelope {
    EventEnvelope {
      event_type: event_type.into(),
      tenant_id: TenantId::new("t1"),
      timestamp: chrono::Utc::now(),
      payload: payload.as_object().unwrap().clone(),
      metadata: Default::default(),
    }
  }

  #[test]
  fn test_registration_fans_out_to_email_and_inapp() {
    let handler = AuthHandler;
    let routes = handler.routes(&envelope(
      "user.registration.completed",
      json!({"user_id": 5, "email": "a@b.test", "first_name": "John"}),
    ));

    assert_eq!(routes.len(), 2);
    assert_eq!(routes[0].channel, Channel::Email);
    assert_eq!(routes[0].recipient, RecipientSpec::Address("a@b.test".into()));
    assert_eq!(routes[1].channel, Channel::InApp);
    assert_eq!(routes[1].recipient, RecipientSpec::User(UserId(5)));
  }

  #[test]
  fn test_login_failed_without_phone_skips_sms() {
    let handler = AuthHandler;
    let routes = handler.routes(&envelope(
      "user.login.failed",
      json!({"email": "a@b.test", "ip_address": "10.0.0.1"}),
    ));

    assert_eq!(routes.len(), 1);
    assert_eq!(routes[0].channel, Channel::Email);
  }
}
