use courier_core::{Channel, EventEnvelope};

use super::super::registry::{payload_user_id, EventHandler, RecipientSpec, Route};

/// Document lifecycle warnings and expirations.
pub struct DocumentHandler;

impl EventHandler for DocumentHandler {
  fn event_types(&self) -> &'static [&'static str] {
    &["user.document.expiry.warning", "user.document.expired"]
  }

  fn routes(&self, event: &EventEnvelope) -> Vec<Route> {
    let mut routes = Vec::new();

    if let Some(email) = event.payload_str("email") {
      routes.push(Route::new(
        Channel::Email,
        RecipientSpec::Address(email.to_string()),
      ));
    }
    if let Some(user_id) = payload_user_id(&event.payload, "user_id") {
      routes.push(Route::new(Channel::InApp, RecipientSpec::User(user_id)));
    }

    routes
  }
}
