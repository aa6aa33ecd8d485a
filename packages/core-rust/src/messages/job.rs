//! Background job records exchanged between the gateway (producer) and the
//! worker (consumer) through a shared queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A queued unit of background work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEnvelope {
    /// Unique job identifier.
    pub id: String,
    /// Queue the job was pushed to; selects the handler.
    pub queue: String,
    /// Job name within the queue (e.g. `resource.created`).
    pub name: String,
    #[serde(default)]
    pub payload: Value,
    /// Milliseconds since epoch when the job was enqueued.
    pub enqueued_at: u64,
    /// Number of failed attempts so far.
    #[serde(default)]
    pub attempts: u32,
}

impl JobEnvelope {
    /// Encodes the job as JSON for list-backed queues.
    ///
    /// # Errors
    ///
    /// Returns the serializer error.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decodes a job previously produced by [`JobEnvelope::to_json`].
    ///
    /// # Errors
    ///
    /// Returns the deserializer error for malformed entries.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn attempts_default_to_zero() {
        let job = JobEnvelope::from_json(
            r#"{"id":"j1","queue":"resources","name":"resource.created","payload":{"id":"r1"},"enqueuedAt":1}"#,
        )
        .unwrap();
        assert_eq!(job.attempts, 0);
        assert_eq!(job.payload, json!({"id": "r1"}));
        assert_eq!(JobEnvelope::from_json(&job.to_json().unwrap()).unwrap(), job);
    }
}
