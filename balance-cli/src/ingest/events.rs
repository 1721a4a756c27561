//! Change notifications for push-style subscribers
//!
//! At-most-once delivery: late subscribers do not see history, and lagging
//! ones lose the oldest events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    DatasetUpdated,
    EtlError,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: EventType,
    pub dataset_id: String,
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub ts: DateTime<Utc>,
}

impl ChangeEvent {
    pub fn dataset_updated(
        dataset_id: &str,
        source_id: &str,
        year: Option<i32>,
        warnings: Vec<String>,
    ) -> Self {
        ChangeEvent {
            kind: EventType::DatasetUpdated,
            dataset_id: dataset_id.to_string(),
            source_id: source_id.to_string(),
            year,
            warnings: Some(warnings),
            message: None,
            ts: Utc::now(),
        }
    }

    pub fn etl_error(dataset_id: &str, source_id: &str, message: impl Into<String>) -> Self {
        ChangeEvent {
            kind: EventType::EtlError,
            dataset_id: dataset_id.to_string(),
            source_id: source_id.to_string(),
            year: None,
            warnings: None,
            message: Some(message.into()),
            ts: Utc::now(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ChangeEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        EventBus { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.tx.subscribe()
    }

    /// Send to current subscribers; returns how many received it
    pub fn publish(&self, event: ChangeEvent) -> usize {
        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                log::debug!("No subscribers for {:?} on '{}'", event.kind, event.dataset_id);
                0
            }
        }
    }
}
