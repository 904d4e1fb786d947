//! Template rendering: placeholder substitution plus the tenant branding
//! wrapper for email bodies.

mod branding;

pub use branding::wrap_email_body;

use chrono::{DateTime, Utc};
use courier_core::{RenderedContent, Template};
use serde_json::{Map, Value};

/// Render a template against a context map.
///
/// Both `{name}` and `{{name}}` markers resolve against the same context
/// keys. A marker whose key is absent from the context is preserved
/// verbatim; rendering never fails on missing keys.
pub fn render(template: &Template, context: &Map<String, Value>) -> RenderedContent {
  RenderedContent {
    subject: template
      .subject
      .as_deref()
      .map(|subject| substitute(subject, context)),
    body: substitute(&template.body, context),
    data: template.data.as_ref().map(|data| substitute_value(data, context)),
  }
}

/// Substitute placeholder markers in a single string.
pub fn substitute(input: &str, context: &Map<String, Value>) -> String {
  let mut out = String::with_capacity(input.len());
  let bytes = input.as_bytes();
  let mut i = 0;

  while i < bytes.len() {
    if bytes[i] != b'{' {
      let start = i;
      while i < bytes.len() && bytes[i] != b'{' {
        i += 1;
      }
      out.push_str(&input[start..i]);
      continue;
    }

    let double = bytes.get(i + 1) == Some(&b'{');
    let (open_len, close) = if double { (2, "}}") } else { (1, "}") };

    match input[i + open_len..].find(close) {
      Some(rel) => {
        let name = &input[i + open_len..i + open_len + rel];
        let marker_end = i + open_len + rel + close.len();

        if is_placeholder_name(name) {
          match context.get(name.trim()) {
            Some(value) => out.push_str(&format_value(value)),
            // Unknown key: the literal marker survives in the output
            None => out.push_str(&input[i..marker_end]),
          }
          i = marker_end;
        } else {
          out.push('{');
          i += 1;
        }
      }
      None => {
        out.push('{');
        i += 1;
      }
    }
  }

  out
}

/// Recursively substitute markers inside the string leaves of a structured
/// payload.
fn substitute_value(value: &Value, context: &Map<String, Value>) -> Value {
  match value {
    Value::String(s) => Value::String(substitute(s, context)),
    Value::Array(items) => Value::Array(
      items
        .iter()
        .map(|item| substitute_value(item, context))
        .collect(),
    ),
    Value::Object(map) => Value::Object(
      map
        .iter()
        .map(|(k, v)| (k.clone(), substitute_value(v, context)))
        .collect(),
    ),
    other => other.clone(),
  }
}

fn is_placeholder_name(name: &str) -> bool {
  let trimmed = name.trim();
  !trimmed.is_empty()
    && trimmed
      .chars()
      .all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

/// Context values substitute as plain text; ISO-8601 timestamp strings are
/// reformatted to a human-readable form.
fn format_value(value: &Value) -> String {
  match value {
    Value::String(s) => match DateTime::parse_from_rfc3339(s) {
      Ok(ts) => humanize_timestamp(ts.with_timezone(&Utc)),
      Err(_) => s.clone(),
    },
    Value::Number(n) => n.to_string(),
    Value::Bool(b) => b.to_string(),
    Value::Null => String::new(),
    other => other.to_string(),
  }
}

fn humanize_timestamp(ts: DateTime<Utc>) -> String {
  ts.format("%B %-d, %Y at %H:%M UTC").to_string()
}

#[cfg(test)]
mod tests {
  use super::*;
  use courier_core::{Channel, TenantId};
  use serde_json::json;

  fn ctx(value: Value) -> Map<String, Value> {
    value.as_object().unwrap().clone()
  }

  #[test]
  fn test_single_and_double_markers_substitute() {
    let context = ctx(json!({"name": "Jo"}));
    assert_eq!(substitute("Hi {name} / {{name}}!", &context), "Hi Jo / Jo!");
  }

  #[test]
  fn test_missing_key_preserves_literal_marker() {
    let context = ctx(json!({"name": "Jo"}));
    assert_eq!(
      substitute("Hi {name}, code {code} / {{code}}", &context),
      "Hi Jo, code {code} / {{code}}"
    );
  }

  #[test]
  fn test_numbers_and_bools_format_plainly() {
    let context = ctx(json!({"amount": 42, "overdue": true}));
    assert_eq!(
      substitute("{amount} items, overdue: {overdue}", &context),
      "42 items, overdue: true"
    );
  }

  #[test]
  fn test_timestamp_context_values_humanize() {
    let context = ctx(json!({"expires_at": "2026-03-01T09:30:00Z"}));
    assert_eq!(
      substitute("Expires {expires_at}", &context),
      "Expires March 1, 2026 at 09:30 UTC"
    );
  }

  #[test]
  fn test_unclosed_brace_is_literal() {
    let context = ctx(json!({"name": "Jo"}));
    assert_eq!(substitute("brace { and {name}", &context), "brace { and Jo");
  }

  #[test]
  fn test_render_is_idempotent() {
    let template = Template::draft(
      TenantId::new("t1"),
      "welcome",
      Channel::Email,
      Some("Welcome {first_name}"),
      "Hello {first_name}, welcome aboard.",
      &["first_name"],
    );
    let context = ctx(json!({"first_name": "John"}));

    let first = render(&template, &context);
    let second = render(&template, &context);
    assert_eq!(first, second);
    assert_eq!(first.subject.as_deref(), Some("Welcome John"));
  }

  #[test]
  fn test_disjoint_context_union_commutes() {
    let template = Template::draft(
      TenantId::new("t1"),
      "alert",
      Channel::Sms,
      None,
      "{greeting} {name}",
      &["greeting", "name"],
    );

    let mut left = ctx(json!({"greeting": "Hi"}));
    left.extend(ctx(json!({"name": "Jo"})));

    let mut right = ctx(json!({"name": "Jo"}));
    right.extend(ctx(json!({"greeting": "Hi"})));

    assert_eq!(render(&template, &left), render(&template, &right));
  }

  #[test]
  fn test_data_payload_substitution() {
    let template = Template::draft(
      TenantId::new("t1"),
      "push",
      Channel::Push,
      Some("{title}"),
      "{body}",
      &["title", "body", "task_id"],
    )
    .with_data(json!({"task_id": "{task_id}", "badge": 1}));

    let context = ctx(json!({"title": "Task", "body": "Assigned", "task_id": "T-9"}));
    let rendered = render(&template, &context);

    assert_eq!(rendered.data.unwrap(), json!({"task_id": "T-9", "badge": 1}));
  }
}
