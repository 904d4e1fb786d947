//! End-to-end delivery pipeline tests over the in-memory stores: event
//! dispatch, rendering, the worker pool, retries and terminal states.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use common::*;
use courier_core::{
  Channel, DeliveryRecord, DeliveryState, FailureReason, RenderedContent, TenantId,
};
use courier_server::build_dispatcher;
use courier_server::queue::WorkerPool;
use courier_server::senders::{ChannelSender, SendOutcome};
use courier_server::store::DeliveryStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn spawn_pool(world: &TestWorld, senders: Vec<Arc<dyn ChannelSender>>) -> CancellationToken {
  let shutdown = CancellationToken::new();
  let pool = Arc::new(WorkerPool::new(
    world.state.queue.clone(),
    senders,
    world.state.credentials.clone(),
    world.state.config.delivery.clone(),
  ));
  pool.spawn(shutdown.clone());
  shutdown
}

#[tokio::test]
async fn welcome_email_reaches_success_with_rendered_name() {
  let world = test_world();
  let dispatcher = build_dispatcher(&world.state);
  let email = ScriptedSender::accepting(Channel::Email);
  let shutdown = spawn_pool(&world, vec![email.clone()]);

  let event = envelope(
    "user.registration.completed",
    "T1",
    json!({"user_id": "U", "email": "a@b.test", "first_name": "John"}),
  );
  let summary = dispatcher.dispatch(&event).await.unwrap();
  // The string user_id cannot address in-app delivery, so exactly one
  // record (the email) comes out of the fan-out
  assert_eq!(summary.enqueued, 1);

  assert!(
    wait_until(Duration::from_secs(3), || {
      world
        .deliveries
        .snapshot()
        .iter()
        .any(|r| r.state == DeliveryState::Success)
    })
    .await
  );

  let records = world.deliveries.snapshot();
  assert_eq!(records.len(), 1);
  let record = &records[0];
  assert_eq!(record.channel, Channel::Email);
  assert_eq!(record.recipient, "a@b.test");
  assert!(record.content.subject.as_deref().unwrap().contains("John"));
  assert_eq!(record.retry_count, 0);
  assert!(record.sent_at.is_some());
  assert_eq!(email.sent_count(), 1);

  shutdown.cancel();
}

#[tokio::test]
async fn two_factor_code_goes_out_over_sms() {
  let world = test_world();
  let dispatcher = build_dispatcher(&world.state);
  let sms = ScriptedSender::accepting(Channel::Sms);
  let shutdown = spawn_pool(&world, vec![sms.clone()]);

  let event = envelope(
    "auth.2fa.code.requested",
    "T1",
    json!({"method": "sms", "phone": "+14155552671", "code": "123456"}),
  );
  assert_eq!(dispatcher.dispatch(&event).await.unwrap().enqueued, 1);

  assert!(
    wait_until(Duration::from_secs(3), || {
      world
        .deliveries
        .snapshot()
        .iter()
        .any(|r| r.state == DeliveryState::Success)
    })
    .await
  );

  let records = world.deliveries.snapshot();
  let record = &records[0];
  assert_eq!(record.channel, Channel::Sms);
  assert_eq!(record.recipient, "+14155552671");
  assert!(record.content.body.contains("123456"));

  shutdown.cancel();
}

#[tokio::test]
async fn transient_sms_failure_retries_then_succeeds() {
  let world = test_world();
  let dispatcher = build_dispatcher(&world.state);
  let sms = ScriptedSender::new(
    Channel::Sms,
    vec![SendOutcome::failure(
      FailureReason::ProviderError,
      Some("503 slow down".to_string()),
    )],
  );
  let shutdown = spawn_pool(&world, vec![sms.clone()]);

  let event = envelope(
    "user.login.failed",
    "T1",
    json!({"phone": "+14155552671", "ip_address": "10.0.0.9"}),
  );
  // login.failed without an email routes to SMS only
  assert_eq!(dispatcher.dispatch(&event).await.unwrap().enqueued, 1);

  assert!(
    wait_until(Duration::from_secs(3), || {
      world
        .deliveries
        .snapshot()
        .iter()
        .any(|r| r.state == DeliveryState::Retrying)
    })
    .await
  );

  let record = world.deliveries.snapshot().pop().unwrap();
  assert_eq!(record.retry_count, 1);
  assert_eq!(record.failure_reason, Some(FailureReason::ProviderError));

  // First retry lands about a minute out, jittered by up to a quarter
  let delay = (record.next_attempt_at - Utc::now()).num_seconds();
  assert!((40..=80).contains(&delay), "unexpected retry delay {}s", delay);

  // Pull the retry forward instead of waiting a minute of wall clock
  world.deliveries.set_next_attempt(record.id, Utc::now());

  assert!(
    wait_until(Duration::from_secs(3), || {
      world
        .deliveries
        .snapshot()
        .iter()
        .any(|r| r.state == DeliveryState::Success)
    })
    .await
  );

  let record = world.deliveries.snapshot().pop().unwrap();
  assert_eq!(record.retry_count, 1);
  assert_eq!(sms.sent_count(), 2);

  shutdown.cancel();
}

#[tokio::test]
async fn non_retriable_push_failure_fails_on_first_attempt() {
  let world = test_world();
  let push = ScriptedSender::new(
    Channel::Push,
    vec![SendOutcome::failure_with(
      FailureReason::ProviderError,
      false,
      Some("UNREGISTERED".to_string()),
    )],
  );
  let shutdown = spawn_pool(&world, vec![push]);

  let record = DeliveryRecord::new(
    TenantId::new("T1"),
    Channel::Push,
    "dead-device-token",
    RenderedContent {
      subject: Some("Task".into()),
      body: "Assigned".into(),
      data: None,
    },
    json!({}),
  );
  world.state.queue.enqueue(record).await.unwrap();

  assert!(
    wait_until(Duration::from_secs(3), || {
      world
        .deliveries
        .snapshot()
        .iter()
        .any(|r| r.state == DeliveryState::Failed)
    })
    .await
  );

  let record = world.deliveries.snapshot().pop().unwrap();
  assert_eq!(record.retry_count, 0);
  assert_eq!(record.failure_reason, Some(FailureReason::ProviderError));
  assert!(record.provider_response.as_deref().unwrap().contains("UNREGISTERED"));

  shutdown.cancel();
}

#[tokio::test]
async fn retriable_failure_at_max_retries_goes_terminal() {
  let world = test_world();
  let sms = ScriptedSender::new(
    Channel::Sms,
    vec![SendOutcome::failure(
      FailureReason::NetworkError,
      Some("connect timeout".to_string()),
    )],
  );
  let shutdown = spawn_pool(&world, vec![sms]);

  let mut record = DeliveryRecord::new(
    TenantId::new("T1"),
    Channel::Sms,
    "+14155552671",
    RenderedContent {
      subject: None,
      body: "code".into(),
      data: None,
    },
    json!({}),
  );
  record.retry_count = record.max_retries;
  world.state.queue.enqueue(record).await.unwrap();

  assert!(
    wait_until(Duration::from_secs(3), || {
      world
        .deliveries
        .snapshot()
        .iter()
        .any(|r| r.state == DeliveryState::Failed)
    })
    .await
  );

  let record = world.deliveries.snapshot().pop().unwrap();
  assert_eq!(record.retry_count, record.max_retries);
  assert_eq!(record.failure_reason, Some(FailureReason::NetworkError));

  shutdown.cancel();
}

#[tokio::test]
async fn unknown_event_type_creates_no_records() {
  let world = test_world();
  let dispatcher = build_dispatcher(&world.state);

  let event = envelope("billing.widget.exploded", "T1", json!({"x": 1}));
  let result = dispatcher.dispatch(&event).await;

  assert!(matches!(
    result,
    Err(courier_server::events::DispatchError::Unhandled)
  ));
  assert!(world.deliveries.snapshot().is_empty());
}

#[tokio::test]
async fn redelivered_event_is_deduplicated_by_event_id() {
  let world = test_world();
  let dispatcher = build_dispatcher(&world.state);

  let mut event = envelope(
    "user.password.reset.requested",
    "T1",
    json!({"email": "a@b.test", "first_name": "Jo", "reset_url": "https://r", "expires_at": "2026-03-01T09:30:00Z"}),
  );
  event.metadata.event_id = Some("evt-42".to_string());

  let first = dispatcher.dispatch(&event).await.unwrap();
  assert_eq!(first.enqueued, 1);
  assert_eq!(first.duplicates, 0);

  let second = dispatcher.dispatch(&event).await.unwrap();
  assert_eq!(second.enqueued, 0);
  assert_eq!(second.duplicates, 1);

  assert_eq!(world.deliveries.snapshot().len(), 1);
}

#[tokio::test]
async fn terminal_states_are_immutable() {
  let world = test_world();
  let record = DeliveryRecord::new(
    TenantId::new("T1"),
    Channel::Email,
    "a@b.test",
    RenderedContent {
      subject: None,
      body: "b".into(),
      data: None,
    },
    json!({}),
  );
  let id = record.id;
  world.deliveries.insert(&record).await.unwrap();

  let claimed = world.deliveries.claim_due(Utc::now(), 8).await.unwrap();
  assert_eq!(claimed.len(), 1);

  // The claim is exclusive until released
  assert!(world.deliveries.claim_due(Utc::now(), 8).await.unwrap().is_empty());

  world.deliveries.mark_success(id, None).await.unwrap();
  world
    .deliveries
    .mark_failed(id, FailureReason::InternalError, None)
    .await
    .unwrap();

  let record = world.deliveries.get(id).await.unwrap().unwrap();
  assert_eq!(record.state, DeliveryState::Success);
  assert!(record.failure_reason.is_none());
}

#[tokio::test]
async fn stale_claims_are_reclaimed_to_retrying() {
  let world = test_world();
  let record = DeliveryRecord::new(
    TenantId::new("T1"),
    Channel::Email,
    "a@b.test",
    RenderedContent {
      subject: None,
      body: "b".into(),
      data: None,
    },
    json!({}),
  );
  let id = record.id;
  world.deliveries.insert(&record).await.unwrap();

  assert_eq!(world.deliveries.claim_due(Utc::now(), 1).await.unwrap().len(), 1);

  // Pretend the lease timeout elapsed with the worker gone
  let reclaimed = world
    .deliveries
    .reclaim_stale(Utc::now() + ChronoDuration::seconds(1))
    .await
    .unwrap();
  assert_eq!(reclaimed, 1);

  let record = world.deliveries.get(id).await.unwrap().unwrap();
  assert_eq!(record.state, DeliveryState::Retrying);
  assert_eq!(record.retry_count, 1);
  assert!(record.claimed_at.is_none());
}

#[tokio::test]
async fn direct_send_renders_and_enqueues() {
  let world = test_world();

  let context = json!({"first_name": "Ada"}).as_object().unwrap().clone();
  world
    .state
    .send_direct(
      TenantId::new("T1"),
      Channel::Email,
      "user.registration.completed",
      context,
      "ada@b.test".to_string(),
    )
    .await
    .unwrap();

  let records = world.deliveries.snapshot();
  assert_eq!(records.len(), 1);
  assert_eq!(records[0].state, DeliveryState::Pending);
  assert!(records[0].content.subject.as_deref().unwrap().contains("Ada"));
  // Email bodies carry the branded HTML shell alongside the raw body
  let html = records[0].content.data.as_ref().unwrap()["html"]
    .as_str()
    .unwrap();
  assert!(html.contains("Tenant T1"));
}
