use async_trait::async_trait;
use courier_core::{credential::secret_keys, Channel, Credential, DeliveryRecord, FailureReason};
use lettre::{
  message::{header::ContentType, Mailbox, MultiPart, SinglePart},
  transport::smtp::authentication::Credentials as SmtpCredentials,
  AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::debug;

use super::{ChannelSender, SendOutcome};

/// SMTP email sender.
///
/// A transport is built per record from the tenant's credentials;
/// connections are not pooled across records.
pub struct EmailSender;

impl EmailSender {
  pub fn new() -> Self {
    Self
  }

  fn build_transport(
    credential: &Credential,
  ) -> Result<AsyncSmtpTransport<Tokio1Executor>, SendOutcome> {
    let host = credential
      .secret(secret_keys::SMTP_HOST)
      .ok_or_else(|| SendOutcome::failure(FailureReason::AuthError, missing("smtp_host")))?;
    let port: u16 = credential
      .secret(secret_keys::SMTP_PORT)
      .and_then(|p| p.parse().ok())
      .unwrap_or(587);
    let use_tls = credential
      .secret(secret_keys::SMTP_USE_TLS)
      .map(|v| v != "false")
      .unwrap_or(true);

    let mut builder = if use_tls {
      AsyncSmtpTransport::<Tokio1Executor>::relay(host)
        .map_err(|e| SendOutcome::failure(FailureReason::NetworkError, Some(e.to_string())))?
    } else {
      AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host)
    };

    if let (Some(username), Some(password)) = (
      credential.secret(secret_keys::SMTP_USERNAME),
      credential.secret(secret_keys::SMTP_PASSWORD),
    ) {
      if !username.is_empty() {
        builder = builder.credentials(SmtpCredentials::new(
          username.to_string(),
          password.to_string(),
        ));
      }
    }

    Ok(builder.port(port).build())
  }

  fn build_message(credential: &Credential, record: &DeliveryRecord) -> Result<Message, SendOutcome> {
    let from: Mailbox = credential
      .secret(secret_keys::SMTP_FROM)
      .and_then(|f| f.parse().ok())
      .ok_or_else(|| SendOutcome::failure(FailureReason::AuthError, missing("smtp_from")))?;

    let to: Mailbox = record.recipient.parse().map_err(|_| {
      SendOutcome::failure(
        FailureReason::ContentError,
        Some(format!("invalid recipient address: {}", record.recipient)),
      )
    })?;

    // The branded HTML shell is rendered up front and carried in the
    // content snapshot; the plain part falls back to the bare body
    let html = record
      .content
      .data
      .as_ref()
      .and_then(|data| data.get("html"))
      .and_then(|v| v.as_str())
      .unwrap_or(&record.content.body)
      .to_string();
    let text = strip_tags(&record.content.body);

    Message::builder()
      .from(from)
      .to(to)
      .subject(record.content.subject.as_deref().unwrap_or_default())
      .multipart(
        MultiPart::alternative()
          .singlepart(
            SinglePart::builder()
              .header(ContentType::TEXT_PLAIN)
              .body(text),
          )
          .singlepart(
            SinglePart::builder()
              .header(ContentType::TEXT_HTML)
              .body(html),
          ),
      )
      .map_err(|e| SendOutcome::failure(FailureReason::ContentError, Some(e.to_string())))
  }

  fn classify(error: &lettre::transport::smtp::Error) -> SendOutcome {
    let text = error.to_string();
    let lowered = text.to_lowercase();

    if lowered.contains("authentication") || lowered.contains("535") {
      SendOutcome::failure(FailureReason::AuthError, Some(text))
    } else if error.is_permanent() {
      // Permanent 5xx rejection: retrying cannot help
      SendOutcome::failure_with(FailureReason::ProviderError, false, Some(text))
    } else if error.is_transient() {
      SendOutcome::failure(FailureReason::ProviderError, Some(text))
    } else {
      SendOutcome::failure(FailureReason::NetworkError, Some(text))
    }
  }
}

impl Default for EmailSender {
  fn default() -> Self {
    Self::new()
  }
}

#[async_trait]
impl ChannelSender for EmailSender {
  fn channel(&self) -> Channel {
    Channel::Email
  }

  async fn send(&self, credential: Option<&Credential>, record: &DeliveryRecord) -> SendOutcome {
    let Some(credential) = credential else {
      return SendOutcome::failure(FailureReason::AuthError, missing("email credential"));
    };

    let transport = match Self::build_transport(credential) {
      Ok(transport) => transport,
      Err(outcome) => return outcome,
    };
    let message = match Self::build_message(credential, record) {
      Ok(message) => message,
      Err(outcome) => return outcome,
    };

    match transport.send(message).await {
      Ok(response) => {
        debug!(record = %record.id, "SMTP accepted message");
        SendOutcome::success(Some(format!("{:?}", response.code())))
      }
      Err(e) => Self::classify(&e),
    }
  }
}

fn missing(what: &str) -> Option<String> {
  Some(format!("missing {}", what))
}

/// Naive tag strip for the plaintext alternative part
fn strip_tags(html: &str) -> String {
  let mut out = String::with_capacity(html.len());
  let mut in_tag = false;
  for c in html.chars() {
    match c {
      '<' => in_tag = true,
      '>' => in_tag = false,
      c if !in_tag => out.push(c),
      _ => {}
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use courier_core::{RenderedContent, TenantId};
  use std::collections::BTreeMap;

  fn record(recipient: &str) -> DeliveryRecord {
    DeliveryRecord::new(
      TenantId::new("t1"),
      Channel::Email,
      recipient,
      RenderedContent {
        subject: Some("s".into()),
        body: "<p>b</p>".into(),
        data: None,
      },
      serde_json::json!({}),
    )
  }

  fn credential(secrets: &[(&str, &str)]) -> Credential {
    Credential {
      id: 1,
      tenant_id: TenantId::new("t1"),
      channel: Channel::Email,
      secrets: secrets
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect::<BTreeMap<_, _>>(),
      custom: false,
      active: true,
      created_at: chrono::Utc::now(),
    }
  }

  #[test]
  fn test_strip_tags() {
    assert_eq!(strip_tags("<p>Hi <b>Jo</b></p>"), "Hi Jo");
  }

  #[test]
  fn test_invalid_recipient_is_content_error() {
    let credential = credential(&[
      (secret_keys::SMTP_HOST, "smtp.test"),
      (secret_keys::SMTP_FROM, "noreply@test.example"),
    ]);
    let outcome = EmailSender::build_message(&credential, &record("not-an-address")).unwrap_err();

    assert!(matches!(
      outcome,
      SendOutcome::Failure {
        reason: FailureReason::ContentError,
        retriable: false,
        ..
      }
    ));
  }

  #[tokio::test]
  async fn test_missing_credential_is_auth_error() {
    let sender = EmailSender::new();
    let outcome = sender.send(None, &record("a@b.test")).await;
    assert!(matches!(
      outcome,
      SendOutcome::Failure {
        reason: FailureReason::AuthError,
        retriable: false,
        ..
      }
    ));
  }
}
