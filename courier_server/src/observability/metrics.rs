//! Metric collectors, grouped by subsystem.

use courier_core::{Channel, FailureReason};
use metrics::counter;

pub struct ConsumerMetrics;

impl ConsumerMetrics {
  pub fn consumed(topic: &str) {
    counter!("courier_events_consumed_total", "topic" => topic.to_string()).increment(1);
  }

  pub fn dead_lettered(topic: &str, cause: &'static str) {
    counter!(
      "courier_events_dead_lettered_total",
      "topic" => topic.to_string(),
      "cause" => cause
    )
    .increment(1);
  }

  pub fn unhandled(event_type: &str) {
    counter!(
      "courier_events_unhandled_total",
      "event_type" => event_type.to_string()
    )
    .increment(1);
  }
}

pub struct DeliveryMetrics;

impl DeliveryMetrics {
  pub fn enqueued(channel: Channel) {
    counter!("courier_deliveries_enqueued_total", "channel" => channel.as_str()).increment(1);
  }

  pub fn delivered(channel: Channel) {
    counter!("courier_deliveries_total", "channel" => channel.as_str(), "outcome" => "success")
      .increment(1);
  }

  pub fn retried(channel: Channel, reason: FailureReason) {
    counter!(
      "courier_deliveries_retried_total",
      "channel" => channel.as_str(),
      "reason" => reason.as_str()
    )
    .increment(1);
  }

  pub fn failed(channel: Channel, reason: FailureReason) {
    counter!(
      "courier_deliveries_total",
      "channel" => channel.as_str(),
      "outcome" => "failed",
      "reason" => reason.as_str()
    )
    .increment(1);
  }

  pub fn reclaimed(count: u64) {
    counter!("courier_delivery_claims_reclaimed_total").increment(count);
  }
}

pub struct HubMetrics;

impl HubMetrics {
  pub fn connected(kind: &'static str) {
    counter!("courier_hub_connections_total", "kind" => kind).increment(1);
  }

  pub fn disconnected(kind: &'static str) {
    counter!("courier_hub_disconnections_total", "kind" => kind).increment(1);
  }

  pub fn broadcast(frames: usize) {
    counter!("courier_hub_frames_broadcast_total").increment(frames as u64);
  }
}
