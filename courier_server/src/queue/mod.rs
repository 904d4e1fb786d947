//! Delivery queue and worker pool.
//!
//! Records are durable rows; workers claim due rows one at a time through
//! the store's atomic claim, invoke the channel sender under a per-call
//! timeout, and walk the record through the
//! `pending -> retrying -> success/failed` state machine.

use chrono::{Duration as ChronoDuration, Utc};
use courier_core::{Channel, CoreError, DeliveryRecord, FailureReason};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::CredentialCache;
use crate::config::DeliveryConfig;
use crate::observability::metrics::DeliveryMetrics;
use crate::senders::{ChannelSender, SendOutcome};
use crate::store::DeliveryStore;

const WORKER_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Exponential backoff with jitter for retry scheduling
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
  pub base_secs: u64,
  pub multiplier: f64,
  pub cap_secs: u64,
  pub jitter: f64,
}

impl BackoffPolicy {
  pub fn from_config(config: &DeliveryConfig) -> Self {
    Self {
      base_secs: config.backoff_base_secs,
      multiplier: 2.0,
      cap_secs: config.backoff_cap_secs,
      jitter: 0.25,
    }
  }

  /// Delay before the `retry_count`-th retry, jittered by up to the
  /// configured fraction and capped.
  pub fn delay(&self, retry_count: u32) -> Duration {
    let exponent = retry_count.saturating_sub(1).min(16);
    let raw = (self.base_secs as f64) * self.multiplier.powi(exponent as i32);
    let capped = raw.min(self.cap_secs as f64);

    let jitter = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
    let jittered = (capped * (1.0 + jitter)).max(1.0);

    Duration::from_secs_f64(jittered.min(self.cap_secs as f64))
  }

  /// Unjittered bounds for the delay, used by tests and scheduling checks
  pub fn delay_bounds(&self, retry_count: u32) -> (Duration, Duration) {
    let exponent = retry_count.saturating_sub(1).min(16);
    let raw = (self.base_secs as f64) * self.multiplier.powi(exponent as i32);
    let capped = raw.min(self.cap_secs as f64);

    let low = (capped * (1.0 - self.jitter)).max(1.0);
    let high = capped * (1.0 + self.jitter);
    (
      Duration::from_secs_f64(low),
      Duration::from_secs_f64(high.min(self.cap_secs as f64)),
    )
  }
}

/// Accepts records for delivery and wakes the worker pool
pub struct DeliveryQueue {
  store: Arc<dyn DeliveryStore>,
  nudge: Notify,
}

impl DeliveryQueue {
  pub fn new(store: Arc<dyn DeliveryStore>) -> Self {
    Self {
      store,
      nudge: Notify::new(),
    }
  }

  pub fn store(&self) -> &Arc<dyn DeliveryStore> {
    &self.store
  }

  /// Persist a record and nudge a waiting worker. Returns false when the
  /// idempotency key already exists (duplicate event redelivery).
  pub async fn enqueue(&self, record: DeliveryRecord) -> Result<bool, CoreError> {
    let inserted = self.store.insert(&record).await?;
    if inserted {
      debug!(record = %record.id, channel = %record.channel, "delivery record enqueued");
      DeliveryMetrics::enqueued(record.channel);
      self.nudge.notify_one();
    } else {
      debug!(record = %record.id, "duplicate delivery record skipped");
    }
    Ok(inserted)
  }

  pub async fn wait_for_work(&self, max_wait: Duration) {
    let _ = tokio::time::timeout(max_wait, self.nudge.notified()).await;
  }
}

/// Fixed-size worker pool draining the delivery queue
pub struct WorkerPool {
  queue: Arc<DeliveryQueue>,
  senders: HashMap<Channel, Arc<dyn ChannelSender>>,
  credentials: Arc<CredentialCache>,
  config: DeliveryConfig,
  backoff: BackoffPolicy,
}

impl WorkerPool {
  pub fn new(
    queue: Arc<DeliveryQueue>,
    senders: Vec<Arc<dyn ChannelSender>>,
    credentials: Arc<CredentialCache>,
    config: DeliveryConfig,
  ) -> Self {
    let backoff = BackoffPolicy::from_config(&config);
    Self {
      queue,
      senders: senders.into_iter().map(|s| (s.channel(), s)).collect(),
      credentials,
      config,
      backoff,
    }
  }

  /// Spawn the workers plus the lease reclaimer. Workers finish their
  /// current record on shutdown and claim nothing new.
  pub fn spawn(self: Arc<Self>, shutdown: CancellationToken) -> Vec<JoinHandle<()>> {
    let mut handles = Vec::with_capacity(self.config.workers + 1);

    for worker_id in 0..self.config.workers {
      let pool = self.clone();
      let token = shutdown.clone();
      handles.push(tokio::spawn(async move {
        pool.worker_loop(worker_id, token).await;
      }));
    }

    let pool = self.clone();
    let token = shutdown;
    handles.push(tokio::spawn(async move {
      pool.reclaimer_loop(token).await;
    }));

    handles
  }

  async fn worker_loop(&self, worker_id: usize, shutdown: CancellationToken) {
    info!(worker = worker_id, "delivery worker started");

    loop {
      if shutdown.is_cancelled() {
        break;
      }

      let claimed = match self.queue.store.claim_due(Utc::now(), 1).await {
        Ok(records) => records,
        Err(e) => {
          error!(worker = worker_id, "claim failed: {}", e);
          tokio::time::sleep(WORKER_POLL_INTERVAL).await;
          continue;
        }
      };

      match claimed.into_iter().next() {
        Some(record) => self.process(record).await,
        None => {
          tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = self.queue.wait_for_work(WORKER_POLL_INTERVAL) => {}
          }
        }
      }
    }

    info!(worker = worker_id, "delivery worker stopped");
  }

  /// Periodically revert claims abandoned by a crashed worker
  async fn reclaimer_loop(&self, shutdown: CancellationToken) {
    let lease = ChronoDuration::seconds(self.config.lease_timeout_secs as i64);
    let interval = Duration::from_secs((self.config.lease_timeout_secs / 2).max(1));

    loop {
      tokio::select! {
        _ = shutdown.cancelled() => break,
        _ = tokio::time::sleep(interval) => {}
      }

      match self.queue.store.reclaim_stale(Utc::now() - lease).await {
        Ok(0) => {}
        Ok(reclaimed) => {
          warn!(reclaimed, "reclaimed stale delivery claims");
          DeliveryMetrics::reclaimed(reclaimed);
        }
        Err(e) => error!("lease reclaim failed: {}", e),
      }
    }
  }

  async fn process(&self, record: DeliveryRecord) {
    let Some(sender) = self.senders.get(&record.channel) else {
      error!(record = %record.id, channel = %record.channel, "no sender for channel");
      let _ = self
        .queue
        .store
        .mark_failed(record.id, FailureReason::InternalError, Some("no sender".into()))
        .await;
      return;
    };

    // In-app needs no provider secrets; everything else loads the tenant
    // credential through the cache
    let credential = if record.channel == Channel::InApp {
      None
    } else {
      match self.credentials.resolve(&record.tenant_id, record.channel).await {
        Ok(credential) => credential,
        Err(e) => {
          warn!(record = %record.id, "credential resolution failed: {}", e);
          self
            .handle_failure(
              &record,
              FailureReason::InternalError,
              true,
              Some(e.to_string()),
            )
            .await;
          return;
        }
      }
    };

    let timeout = if record.channel == Channel::InApp {
      Duration::from_secs(self.config.inapp_timeout_secs)
    } else {
      Duration::from_secs(self.config.send_timeout_secs)
    };

    let outcome = match tokio::time::timeout(
      timeout,
      sender.send(credential.as_deref(), &record),
    )
    .await
    {
      Ok(outcome) => outcome,
      // Worker-side timeout is an internal, retriable failure
      Err(_) => SendOutcome::failure(
        FailureReason::InternalError,
        Some(format!("send timed out after {:?}", timeout)),
      ),
    };

    match outcome {
      SendOutcome::Success { provider_response } => {
        if record.channel != Channel::InApp {
          self
            .credentials
            .record_auth_success(&record.tenant_id, record.channel);
        }
        if let Err(e) = self.queue.store.mark_success(record.id, provider_response).await {
          error!(record = %record.id, "failed to persist success: {}", e);
        }
        DeliveryMetrics::delivered(record.channel);
        info!(record = %record.id, channel = %record.channel, "delivery succeeded");
      }
      SendOutcome::Failure {
        reason,
        retriable,
        provider_response,
      } => {
        if reason == FailureReason::AuthError {
          self
            .credentials
            .record_auth_failure(&record.tenant_id, record.channel);
        }
        self
          .handle_failure(&record, reason, retriable, provider_response)
          .await;
      }
    }
  }

  async fn handle_failure(
    &self,
    record: &DeliveryRecord,
    reason: FailureReason,
    retriable: bool,
    provider_response: Option<String>,
  ) {
    if !retriable || record.retry_count >= record.max_retries {
      if let Err(e) = self
        .queue
        .store
        .mark_failed(record.id, reason, provider_response)
        .await
      {
        error!(record = %record.id, "failed to persist failure: {}", e);
      }
      DeliveryMetrics::failed(record.channel, reason);
      warn!(
        record = %record.id,
        channel = %record.channel,
        reason = %reason,
        retries = record.retry_count,
        "delivery failed terminally"
      );
      return;
    }

    let next_attempt_at = Utc::now()
      + ChronoDuration::from_std(self.backoff.delay(record.retry_count + 1))
        .unwrap_or_else(|_| ChronoDuration::seconds(self.backoff.base_secs as i64));

    if let Err(e) = self
      .queue
      .store
      .mark_retrying(record.id, reason, provider_response, next_attempt_at)
      .await
    {
      error!(record = %record.id, "failed to schedule retry: {}", e);
      return;
    }

    DeliveryMetrics::retried(record.channel, reason);
    info!(
      record = %record.id,
      channel = %record.channel,
      reason = %reason,
      attempt = record.retry_count + 1,
      next_attempt = %next_attempt_at,
      "delivery scheduled for retry"
    );
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn policy() -> BackoffPolicy {
    BackoffPolicy {
      base_secs: 60,
      multiplier: 2.0,
      cap_secs: 3600,
      jitter: 0.25,
    }
  }

  #[test]
  fn test_first_retry_is_about_a_minute() {
    let policy = policy();
    for _ in 0..64 {
      let delay = policy.delay(1).as_secs_f64();
      assert!((45.0..=75.0).contains(&delay), "delay {} out of bounds", delay);
    }
  }

  #[test]
  fn test_backoff_doubles_and_caps() {
    let policy = policy();
    let (low2, high2) = policy.delay_bounds(2);
    assert_eq!(low2.as_secs(), 90);
    assert_eq!(high2.as_secs(), 150);

    // Far retries cap at one hour even before jitter
    let (_, high) = policy.delay_bounds(12);
    assert!(high.as_secs() <= 3600);
    for _ in 0..16 {
      assert!(policy.delay(12).as_secs() <= 3600);
    }
  }
}
