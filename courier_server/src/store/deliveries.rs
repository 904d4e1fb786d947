use async_trait::async_trait;
use chrono::{DateTime, Utc};
use courier_core::{
  Channel, CoreError, DeliveryId, DeliveryRecord, FailureReason, RenderedContent,
  TenantId,
};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

/// Durable record store for the delivery queue.
///
/// Claims are atomic: `claim_due` stamps `claimed_at` under a row lock so at
/// most one worker holds a record, and the `mark_*` transitions refuse to
/// touch terminal rows.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
  /// Persist a new record. Returns false when an idempotency key
  /// `(tenant, event_id, channel, recipient)` already exists.
  async fn insert(&self, record: &DeliveryRecord) -> Result<bool, CoreError>;

  /// Atomically claim up to `limit` due records (due = in-flight state,
  /// `next_attempt_at <= now`, unclaimed).
  async fn claim_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<DeliveryRecord>, CoreError>;

  async fn mark_success(
    &self,
    id: DeliveryId,
    provider_response: Option<String>,
  ) -> Result<(), CoreError>;

  /// Record a retriable failure: bump retry_count, release the claim, and
  /// schedule the next attempt.
  async fn mark_retrying(
    &self,
    id: DeliveryId,
    reason: FailureReason,
    provider_response: Option<String>,
    next_attempt_at: DateTime<Utc>,
  ) -> Result<(), CoreError>;

  async fn mark_failed(
    &self,
    id: DeliveryId,
    reason: FailureReason,
    provider_response: Option<String>,
  ) -> Result<(), CoreError>;

  /// Revert stale claims (worker died mid-send) to RETRYING with
  /// retry_count incremented. Returns the number of reclaimed rows.
  async fn reclaim_stale(&self, older_than: DateTime<Utc>) -> Result<u64, CoreError>;

  async fn get(&self, id: DeliveryId) -> Result<Option<DeliveryRecord>, CoreError>;

  /// Unsent in-app records for a recipient, surfaced as the hub's
  /// `unread_count` frame.
  async fn unread_count(&self, tenant_id: &TenantId, recipient: &str) -> Result<i64, CoreError>;
}

pub struct PgDeliveryStore {
  pool: PgPool,
}

impl PgDeliveryStore {
  pub fn new(pool: PgPool) -> Self {
    Self { pool }
  }

  fn row_to_record(row: &PgRow) -> Result<DeliveryRecord, CoreError> {
    let content = RenderedContent {
      subject: row.get("subject"),
      body: row.get("body"),
      data: row.get("data"),
    };

    Ok(DeliveryRecord {
      id: row.get("id"),
      tenant_id: row.get("tenant_id"),
      channel: row.get("channel"),
      recipient: row.get("recipient"),
      content,
      context: row.get("context"),
      event_id: row.get("event_id"),
      state: row.get("state"),
      retry_count: row.get::<i32, _>("retry_count") as u32,
      max_retries: row.get::<i32, _>("max_retries") as u32,
      failure_reason: row.get("failure_reason"),
      provider_response: row.get("provider_response"),
      created_at: row.get("created_at"),
      sent_at: row.get("sent_at"),
      next_attempt_at: row.get("next_attempt_at"),
      claimed_at: row.get("claimed_at"),
      deleted_at: row.get("deleted_at"),
    })
  }
}

const RECORD_COLUMNS: &str = "id, tenant_id, channel, recipient, subject, body, data, context, \
   event_id, state, retry_count, max_retries, failure_reason, provider_response, \
   created_at, sent_at, next_attempt_at, claimed_at, deleted_at";

#[async_trait]
impl DeliveryStore for PgDeliveryStore {
  async fn insert(&self, record: &DeliveryRecord) -> Result<bool, CoreError> {
    let result = sqlx::query(
      "INSERT INTO delivery_records \
         (id, tenant_id, channel, recipient, subject, body, data, context, event_id, \
          state, retry_count, max_retries, created_at, next_attempt_at) \
       VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14) \
       ON CONFLICT (tenant_id, event_id, channel, recipient) WHERE event_id IS NOT NULL \
       DO NOTHING",
    )
    .bind(record.id)
    .bind(&record.tenant_id)
    .bind(record.channel)
    .bind(&record.recipient)
    .bind(&record.content.subject)
    .bind(&record.content.body)
    .bind(&record.content.data)
    .bind(&record.context)
    .bind(&record.event_id)
    .bind(record.state)
    .bind(record.retry_count as i32)
    .bind(record.max_retries as i32)
    .bind(record.created_at)
    .bind(record.next_attempt_at)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected() == 1)
  }

  async fn claim_due(&self, now: DateTime<Utc>, limit: u32) -> Result<Vec<DeliveryRecord>, CoreError> {
    let rows = sqlx::query(&format!(
      "UPDATE delivery_records SET claimed_at = $1 \
       WHERE id IN ( \
         SELECT id FROM delivery_records \
         WHERE state IN ('pending', 'retrying') \
           AND next_attempt_at <= $1 \
           AND claimed_at IS NULL \
           AND deleted_at IS NULL \
         ORDER BY next_attempt_at \
         LIMIT $2 \
         FOR UPDATE SKIP LOCKED \
       ) \
       RETURNING {RECORD_COLUMNS}"
    ))
    .bind(now)
    .bind(limit as i64)
    .fetch_all(&self.pool)
    .await?;

    rows.iter().map(Self::row_to_record).collect()
  }

  async fn mark_success(
    &self,
    id: DeliveryId,
    provider_response: Option<String>,
  ) -> Result<(), CoreError> {
    sqlx::query(
      "UPDATE delivery_records \
       SET state = 'success', sent_at = $2, provider_response = $3, claimed_at = NULL \
       WHERE id = $1 AND state IN ('pending', 'retrying')",
    )
    .bind(id)
    .bind(Utc::now())
    .bind(provider_response)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn mark_retrying(
    &self,
    id: DeliveryId,
    reason: FailureReason,
    provider_response: Option<String>,
    next_attempt_at: DateTime<Utc>,
  ) -> Result<(), CoreError> {
    sqlx::query(
      "UPDATE delivery_records \
       SET state = 'retrying', retry_count = retry_count + 1, failure_reason = $2, \
           provider_response = $3, next_attempt_at = $4, claimed_at = NULL \
       WHERE id = $1 AND state IN ('pending', 'retrying')",
    )
    .bind(id)
    .bind(reason)
    .bind(provider_response)
    .bind(next_attempt_at)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn mark_failed(
    &self,
    id: DeliveryId,
    reason: FailureReason,
    provider_response: Option<String>,
  ) -> Result<(), CoreError> {
    sqlx::query(
      "UPDATE delivery_records \
       SET state = 'failed', failure_reason = $2, provider_response = $3, claimed_at = NULL \
       WHERE id = $1 AND state IN ('pending', 'retrying')",
    )
    .bind(id)
    .bind(reason)
    .bind(provider_response)
    .execute(&self.pool)
    .await?;

    Ok(())
  }

  async fn reclaim_stale(&self, older_than: DateTime<Utc>) -> Result<u64, CoreError> {
    let result = sqlx::query(
      "UPDATE delivery_records \
       SET state = 'retrying', retry_count = retry_count + 1, claimed_at = NULL \
       WHERE claimed_at < $1 AND state IN ('pending', 'retrying')",
    )
    .bind(older_than)
    .execute(&self.pool)
    .await?;

    Ok(result.rows_affected())
  }

  async fn get(&self, id: DeliveryId) -> Result<Option<DeliveryRecord>, CoreError> {
    let row = sqlx::query(&format!(
      "SELECT {RECORD_COLUMNS} FROM delivery_records WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(&self.pool)
    .await?;

    row.as_ref().map(Self::row_to_record).transpose()
  }

  async fn unread_count(&self, tenant_id: &TenantId, recipient: &str) -> Result<i64, CoreError> {
    let row = sqlx::query(
      "SELECT COUNT(*) AS count FROM delivery_records \
       WHERE tenant_id = $1 AND recipient = $2 AND channel = $3 \
         AND sent_at IS NULL AND deleted_at IS NULL",
    )
    .bind(tenant_id)
    .bind(recipient)
    .bind(Channel::InApp)
    .fetch_one(&self.pool)
    .await?;

    Ok(row.get::<i64, _>("count"))
  }
}
