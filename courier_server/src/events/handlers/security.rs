use courier_core::{Channel, EventEnvelope, TenantBranding};
use serde_json::{Map, Value};

use super::super::registry::{base_context, payload_user_id, EventHandler, RecipientSpec, Route};

const DEFAULT_CODE_TTL_MINUTES: i64 = 10;

/// Two-factor authentication events. Code requests route by the method the
/// user chose in the payload; the code itself flows through the template
/// context.
pub struct SecurityHandler;

impl EventHandler for SecurityHandler {
  fn event_types(&self) -> &'static [&'static str] {
    &[
      "auth.2fa.code.requested",
      "auth.2fa.attempt.failed",
      "auth.2fa.method.changed",
    ]
  }

  fn routes(&self, event: &EventEnvelope) -> Vec<Route> {
    let mut routes = Vec::new();
    let email = event.payload_str("email");

    match event.event_type.as_str() {
      "auth.2fa.code.requested" => match event.payload_str("method") {
        Some("sms") => {
          if let Some(phone) = event.payload_str("phone") {
            routes.push(Route::new(
              Channel::Sms,
              RecipientSpec::Address(phone.to_string()),
            ));
          }
        }
        _ => {
          if let Some(email) = email {
            routes.push(Route::new(
              Channel::Email,
              RecipientSpec::Address(email.to_string()),
            ));
          }
        }
      },
      "auth.2fa.attempt.failed" => {
        if let Some(email) = email {
          routes.push(Route::new(
            Channel::Email,
            RecipientSpec::Address(email.to_string()),
          ));
        }
      }
      "auth.2fa.method.changed" => {
        if let Some(email) = email {
          routes.push(Route::new(
            Channel::Email,
            RecipientSpec::Address(email.to_string()),
          ));
        }
        if let Some(user_id) = payload_user_id(&event.payload, "user_id") {
          routes.push(Route::new(Channel::InApp, RecipientSpec::User(user_id)));
        }
      }
      _ => {}
    }

    routes
  }

  fn context(&self, event: &EventEnvelope, branding: &TenantBranding) -> Map<String, Value> {
    let mut context = base_context(event, branding);
    context
      .entry("ttl_minutes".to_string())
      .or_insert_with(|| Value::from(DEFAULT_CODE_TTL_MINUTES));
    context
  }
}
