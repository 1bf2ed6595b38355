//! Job queue using Redis Streams.
//!
//! - Ready jobs are stream entries read through a consumer group.
//! - A delivered job stays in the group's pending list until acked; an
//!   in-flight hash maps its job ID to the stream message ID.
//! - Nacked jobs wait in a sorted set scored by due time (ms) and are moved
//!   back onto the stream when due.
//! - Pending entries idle longer than the visibility timeout are claimed
//!   back and re-added with their attempt count bumped.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::streams::{StreamClaimReply, StreamId, StreamPendingCountReply, StreamRangeReply};
use redis::{AsyncCommands, Script};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::queue::{JobQueue, Redelivery};
use clipo_models::{Job, JobId};

/// Jobs promoted or reclaimed per pass.
const BATCH: usize = 16;

/// Move due payloads from the delayed set onto the stream.
const PROMOTE_SCRIPT: &str = r#"
local due = redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1], 'LIMIT', 0, ARGV[2])
for _, payload in ipairs(due) do
  redis.call('ZREM', KEYS[1], payload)
  redis.call('XADD', KEYS[2], '*', 'job', payload)
end
return #due
"#;

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn parse_entry(entry: &StreamId) -> Option<QueueResult<Job>> {
    let payload: String = entry.get("job")?;
    Some(serde_json::from_str(&payload).map_err(QueueError::from))
}

/// Job queue client.
pub struct RedisJobQueue {
    client: redis::Client,
    config: QueueConfig,
    promote_script: Script,
}

impl RedisJobQueue {
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> QueueResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            config,
            promote_script: Script::new(PROMOTE_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> QueueResult<Self> {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    async fn conn(&self) -> QueueResult<MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| QueueError::connection_failed(e.to_string()))
    }

    /// Initialize the queue (create consumer group if not exists).
    pub async fn init(&self) -> QueueResult<()> {
        let mut conn = self.conn().await?;

        let result: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(_) => info!("Created consumer group: {}", self.config.consumer_group),
            Err(e) if e.to_string().contains("BUSYGROUP") => {
                debug!("Consumer group already exists: {}", self.config.consumer_group);
            }
            Err(e) => return Err(QueueError::Redis(e)),
        }

        Ok(())
    }

    /// Message ID of an in-flight job.
    async fn message_id(
        &self,
        conn: &mut MultiplexedConnection,
        job_id: &JobId,
    ) -> QueueResult<Option<String>> {
        Ok(conn
            .hget(self.config.inflight_key(), job_id.as_str())
            .await?)
    }

    /// Read the payload of a stream entry still held in the pending list.
    async fn load(&self, conn: &mut MultiplexedConnection, message_id: &str) -> QueueResult<Job> {
        let reply: StreamRangeReply = conn
            .xrange(&self.config.stream_name, message_id, message_id)
            .await?;
        let entry = reply
            .ids
            .first()
            .ok_or_else(|| QueueError::job_not_found(message_id))?;
        parse_entry(entry).ok_or_else(|| QueueError::job_not_found(message_id))?
    }

    /// Ack and delete a stream entry and forget its in-flight mapping.
    fn finish(&self, pipe: &mut redis::Pipeline, message_id: &str, job_id: &str) {
        pipe.cmd("XACK")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(message_id)
            .ignore()
            .cmd("XDEL")
            .arg(&self.config.stream_name)
            .arg(message_id)
            .ignore()
            .hdel(self.config.inflight_key(), job_id)
            .ignore();
    }

    /// Add a dead-letter entry and drop the original message.
    async fn dead_letter(
        &self,
        conn: &mut MultiplexedConnection,
        message_id: &str,
        job: &Job,
        reason: &str,
    ) -> QueueResult<()> {
        let payload = serde_json::to_string(job)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("XADD")
            .arg(&self.config.dlq_stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .arg("error")
            .arg(reason)
            .arg("original_id")
            .arg(message_id)
            .ignore();
        self.finish(&mut pipe, message_id, job.job_id.as_str());
        pipe.query_async::<()>(&mut *conn).await?;

        warn!("Moved job {} to DLQ: {}", job.job_id, reason);
        Ok(())
    }

    async fn promote_due(&self, conn: &mut MultiplexedConnection) -> QueueResult<()> {
        let promoted: usize = self
            .promote_script
            .key(self.config.delayed_key())
            .key(&self.config.stream_name)
            .arg(now_ms())
            .arg(BATCH)
            .invoke_async(&mut *conn)
            .await?;
        if promoted > 0 {
            debug!("Promoted {} delayed jobs", promoted);
        }
        Ok(())
    }

    /// Claim entries whose lease ran out and re-add them as new deliveries.
    async fn reclaim_expired(&self, conn: &mut MultiplexedConnection) -> QueueResult<()> {
        let min_idle = self.config.visibility_timeout.as_millis() as u64;

        let pending: StreamPendingCountReply = redis::cmd("XPENDING")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg("IDLE")
            .arg(min_idle)
            .arg("-")
            .arg("+")
            .arg(BATCH)
            .query_async(&mut *conn)
            .await?;

        if pending.ids.is_empty() {
            return Ok(());
        }

        let ids: Vec<&str> = pending.ids.iter().map(|p| p.id.as_str()).collect();
        let claimed: StreamClaimReply = redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg(min_idle)
            .arg(&ids)
            .query_async(&mut *conn)
            .await?;

        for entry in claimed.ids {
            let job = match parse_entry(&entry) {
                Some(Ok(job)) => job,
                _ => {
                    warn!("Dropping unreadable pending entry {}", entry.id);
                    let mut pipe = redis::pipe();
                    self.finish(&mut pipe, &entry.id, "");
                    pipe.query_async::<()>(&mut *conn).await?;
                    continue;
                }
            };

            // No in-flight mapping means the delivery never reached a worker.
            let delivered: bool = conn
                .hexists(self.config.inflight_key(), job.job_id.as_str())
                .await?;
            let next = if delivered { job.next_attempt() } else { job };
            if next.attempt_count >= self.config.max_retries {
                self.dead_letter(conn, &entry.id, &next, "lease expired after final attempt")
                    .await?;
                continue;
            }

            let payload = serde_json::to_string(&next)?;
            let mut pipe = redis::pipe();
            pipe.atomic()
                .cmd("XADD")
                .arg(&self.config.stream_name)
                .arg("*")
                .arg("job")
                .arg(&payload)
                .ignore();
            self.finish(&mut pipe, &entry.id, next.job_id.as_str());
            pipe.query_async::<()>(&mut *conn).await?;

            warn!(
                "Lease expired for job {}, redelivering (attempt count {})",
                next.job_id, next.attempt_count
            );
        }

        Ok(())
    }

    /// One XREADGROUP round. `None` when the block timed out.
    async fn read_one(&self) -> QueueResult<Option<(String, Job)>> {
        // Blocking reads get their own connection so they do not stall
        // commands multiplexed on a shared one.
        let mut conn = self.conn().await?;

        let reply: Option<redis::streams::StreamReadReply> = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg("COUNT")
            .arg(1)
            .arg("BLOCK")
            .arg(self.config.block_ms)
            .arg("STREAMS")
            .arg(&self.config.stream_name)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        let Some(reply) = reply else {
            return Ok(None);
        };

        for stream_key in reply.keys {
            for entry in stream_key.ids {
                match parse_entry(&entry) {
                    Some(Ok(job)) => return Ok(Some((entry.id, job))),
                    Some(Err(e)) => warn!("Failed to parse job payload: {}", e),
                    None => warn!("Stream entry {} has no job payload", entry.id),
                }
                // Ack the malformed message to prevent reprocessing
                let mut pipe = redis::pipe();
                self.finish(&mut pipe, &entry.id, "");
                pipe.query_async::<()>(&mut conn).await?;
            }
        }

        Ok(None)
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    async fn enqueue(&self, job: Job) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(&job)?;

        let message_id: String = redis::cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::enqueue_failed(e.to_string()))?;

        info!("Enqueued job {} with message ID {}", job.job_id, message_id);
        Ok(())
    }

    /// Not cancel-safe. A future dropped after `XREADGROUP` returned but
    /// before the in-flight mapping was written leaves the entry pending
    /// without a mapping. It comes back once the visibility timeout passes,
    /// and without an attempt charged to it.
    async fn dequeue(&self) -> QueueResult<Job> {
        loop {
            {
                let mut conn = self.conn().await?;
                self.promote_due(&mut conn).await?;
                self.reclaim_expired(&mut conn).await?;
            }

            if let Some((message_id, job)) = self.read_one().await? {
                let mut conn = self.conn().await?;
                conn.hset::<_, _, _, ()>(self.config.inflight_key(), job.job_id.as_str(), &message_id)
                    .await?;
                debug!("Consumed job {} ({})", job.job_id, message_id);
                return Ok(job);
            }
        }
    }

    async fn ack(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let Some(message_id) = self.message_id(&mut conn, job_id).await? else {
            return Ok(());
        };

        let mut pipe = redis::pipe();
        pipe.atomic();
        self.finish(&mut pipe, &message_id, job_id.as_str());
        pipe.query_async::<()>(&mut conn).await?;

        debug!("Acknowledged job: {}", job_id);
        Ok(())
    }

    async fn nack(&self, job_id: &JobId, delay: Duration) -> QueueResult<Redelivery> {
        let mut conn = self.conn().await?;
        let message_id = self
            .message_id(&mut conn, job_id)
            .await?
            .ok_or_else(|| QueueError::job_not_found(job_id.as_str()))?;

        let job = self.load(&mut conn, &message_id).await?;
        let next = job.next_attempt();
        let attempts = next.attempt_count;

        if attempts >= self.config.max_retries {
            self.dead_letter(
                &mut conn,
                &message_id,
                &next,
                &format!("retries exhausted after {} attempts", attempts),
            )
            .await?;
            return Err(QueueError::RetryExhausted {
                job_id: job_id.to_string(),
                attempts,
            });
        }

        let due = now_ms() + delay.as_millis() as i64;
        let payload = serde_json::to_string(&next)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .zadd(self.config.delayed_key(), &payload, due)
            .ignore();
        self.finish(&mut pipe, &message_id, job_id.as_str());
        pipe.query_async::<()>(&mut conn).await?;

        debug!("Scheduled job {} for redelivery in {:?}", job_id, delay);
        Ok(Redelivery {
            attempt_count: attempts,
            delay,
        })
    }

    async fn release(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let message_id = self
            .message_id(&mut conn, job_id)
            .await?
            .ok_or_else(|| QueueError::job_not_found(job_id.as_str()))?;

        let job = self.load(&mut conn, &message_id).await?;
        let payload = serde_json::to_string(&job)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("XADD")
            .arg(&self.config.stream_name)
            .arg("*")
            .arg("job")
            .arg(&payload)
            .ignore();
        self.finish(&mut pipe, &message_id, job_id.as_str());
        pipe.query_async::<()>(&mut conn).await?;

        debug!("Released job {} back to the stream", job_id);
        Ok(())
    }

    async fn heartbeat(&self, job_id: &JobId) -> QueueResult<()> {
        let mut conn = self.conn().await?;
        let message_id = self
            .message_id(&mut conn, job_id)
            .await?
            .ok_or_else(|| QueueError::job_not_found(job_id.as_str()))?;

        // Claiming with min-idle 0 resets the entry's idle time.
        redis::cmd("XCLAIM")
            .arg(&self.config.stream_name)
            .arg(&self.config.consumer_group)
            .arg(&self.config.consumer_name)
            .arg(0)
            .arg(&message_id)
            .arg("JUSTID")
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn len(&self) -> QueueResult<usize> {
        let mut conn = self.conn().await?;
        let stream: usize = conn.xlen(&self.config.stream_name).await?;
        let delayed: usize = conn.zcard(self.config.delayed_key()).await?;
        Ok(stream + delayed)
    }

    async fn dead_letter_len(&self) -> QueueResult<usize> {
        let mut conn = self.conn().await?;
        let len: usize = conn.xlen(&self.config.dlq_stream_name).await?;
        Ok(len)
    }

    fn max_retries(&self) -> u32 {
        self.config.max_retries
    }
}
