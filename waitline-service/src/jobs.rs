use chrono::Duration;
use once_cell::sync::Lazy;
use redis::{aio::ConnectionManager, Script};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::clock;

#[derive(Error, Debug)]
pub enum JobError {
    #[error("job queue unavailable")]
    Redis(#[from] redis::RedisError),
    #[error("job envelope could not be encoded")]
    Encode(#[from] serde_json::Error),
}

/// One unit of deferred work. The admission services re-query state on every
/// run, so payloads exist for traceability only.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub payload: serde_json::Value,
}

// Pops at most one job whose fire time has passed. The read and the removal
// run as one script so two pollers can never hand out the same job.
static POP_DUE_SCRIPT: Lazy<Script> = Lazy::new(|| {
    Script::new(
        r#"
        local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, 1)
        if #due == 0 then
            return false
        end
        redis.call('ZREM', KEYS[1], due[1])
        return due[1]
    "#,
    )
});

/// Named durable queues on Redis sorted sets, scored by fire time in
/// milliseconds. One worker process polls one queue.
pub struct JobQueue {
    conn: ConnectionManager,
}

impl JobQueue {
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Schedules `name` on `queue`, delivered no earlier than `now + delay`.
    pub async fn enqueue(
        &mut self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        delay: Duration,
    ) -> Result<(), JobError> {
        let job = Job {
            id: Uuid::new_v4(),
            name: name.to_string(),
            payload,
        };
        let envelope = serde_json::to_string(&job)?;
        let fire_at = fire_time_millis(delay);

        let _: () = redis::cmd("ZADD")
            .arg(queue_key(queue))
            .arg(fire_at)
            .arg(envelope)
            .query_async(&mut self.conn)
            .await?;
        Ok(())
    }

    /// Atomically claims the next due job, if any.
    pub async fn pop_due(&mut self, queue: &str) -> Result<Option<Job>, JobError> {
        let envelope: Option<String> = POP_DUE_SCRIPT
            .key(queue_key(queue))
            .arg(clock::now().timestamp_millis())
            .invoke_async(&mut self.conn)
            .await?;

        match envelope {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

fn queue_key(queue: &str) -> String {
    format!("jobs:{queue}")
}

fn fire_time_millis(delay: Duration) -> i64 {
    clock::now().timestamp_millis() + delay.num_milliseconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_keys_are_namespaced() {
        assert_eq!(queue_key("dequeue"), "jobs:dequeue");
    }

    #[test]
    fn negative_delay_fires_immediately() {
        let now = clock::now().timestamp_millis();
        let fire_at = fire_time_millis(Duration::seconds(-30));
        assert!(fire_at >= now);
    }

    #[test]
    fn positive_delay_moves_fire_time_forward() {
        let now = clock::now().timestamp_millis();
        let fire_at = fire_time_millis(Duration::seconds(60));
        assert!(fire_at >= now + 59_000);
    }

    #[test]
    fn job_envelope_round_trips() {
        let job = Job {
            id: Uuid::new_v4(),
            name: "dequeue-parties".to_string(),
            payload: serde_json::json!({}),
        };
        let raw = serde_json::to_string(&job).unwrap();
        let parsed: Job = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, job);
    }
}
