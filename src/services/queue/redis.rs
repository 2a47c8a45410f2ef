use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;

use super::{Broker, Delivery, QueueError, QueueStats};

/// Reliable-list broker on Redis.
///
/// Keys, for a queue named `q`:
///
/// - `q`: pending messages, pushed on the left and taken from the right
/// - `q:processing:{consumer}`: messages a consumer holds but has not acked
/// - `q:dead`: rejected messages
/// - `q:redelivered`: payloads returned by crash recovery
/// - `q:lease:{consumer}`: present while the consumer is alive
///
/// `BLMOVE` hands a message over and parks it in one atomic step, so a
/// crashed consumer never loses a message.
pub struct RedisBroker {
    client: redis::Client,
    queue: String,
}

impl RedisBroker {
    pub fn new(redis_url: &str, queue: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            queue: queue.into(),
        })
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, QueueError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn processing_key(&self, consumer: &str) -> String {
        format!("{}:processing:{consumer}", self.queue)
    }

    fn lease_key(&self, consumer: &str) -> String {
        format!("{}:lease:{consumer}", self.queue)
    }

    fn dead_key(&self) -> String {
        format!("{}:dead", self.queue)
    }

    fn redelivered_key(&self) -> String {
        format!("{}:redelivered", self.queue)
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn publish(&self, payload: String) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lpush::<_, _, ()>(&self.queue, payload).await?;
        Ok(())
    }

    async fn receive(&self, consumer: &str, timeout: Duration) -> Result<Option<Delivery>, QueueError> {
        let mut conn = self.connection().await?;
        // A zero timeout blocks forever in Redis.
        let seconds = timeout.as_secs_f64().max(0.1);
        let payload: Option<String> = redis::cmd("BLMOVE")
            .arg(&self.queue)
            .arg(self.processing_key(consumer))
            .arg("RIGHT")
            .arg("LEFT")
            .arg(seconds)
            .query_async(&mut conn)
            .await?;

        let Some(payload) = payload else {
            return Ok(None);
        };
        let redelivered: i64 = conn.srem(self.redelivered_key(), &payload).await?;

        Ok(Some(Delivery {
            consumer: consumer.to_string(),
            payload,
            redelivered: redelivered > 0,
        }))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        conn.lrem::<_, _, ()>(self.processing_key(&delivery.consumer), 1, &delivery.payload)
            .await?;
        Ok(())
    }

    async fn reject(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::pipe()
            .atomic()
            .lrem(self.processing_key(&delivery.consumer), 1, &delivery.payload)
            .ignore()
            .lpush(self.dead_key(), &delivery.payload)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn recover(&self, consumer: &str) -> Result<u64, QueueError> {
        let mut conn = self.connection().await?;
        let processing = self.processing_key(consumer);
        let mut moved = 0;

        // Newest first onto the consuming end, so the oldest is taken next.
        loop {
            let payload: Option<String> = redis::cmd("LMOVE")
                .arg(&processing)
                .arg(&self.queue)
                .arg("LEFT")
                .arg("RIGHT")
                .query_async(&mut conn)
                .await?;
            let Some(payload) = payload else {
                break;
            };
            conn.sadd::<_, _, ()>(self.redelivered_key(), payload).await?;
            moved += 1;
        }

        Ok(moved)
    }

    async fn heartbeat(&self, consumers: &[String], lease: Duration) -> Result<(), QueueError> {
        if consumers.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection().await?;
        let millis = lease.as_millis().max(1) as u64;
        let mut pipe = redis::pipe();
        for consumer in consumers {
            pipe.cmd("SET")
                .arg(self.lease_key(consumer))
                .arg(1)
                .arg("PX")
                .arg(millis)
                .ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }

    async fn orphaned(&self) -> Result<Vec<String>, QueueError> {
        let mut conn = self.connection().await?;
        let prefix = self.processing_key("");
        let pattern = format!("{prefix}*");

        let mut consumers = Vec::new();
        let mut cursor: u64 = 0;
        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(100)
                .query_async(&mut conn)
                .await?;
            consumers.extend(
                keys.iter()
                    .filter_map(|key| key.strip_prefix(&prefix))
                    .map(str::to_string),
            );
            if next == 0 {
                break;
            }
            cursor = next;
        }
        consumers.sort();
        consumers.dedup();

        // Empty lists do not exist in Redis, so every scanned consumer holds messages.
        let mut orphaned = Vec::new();
        for consumer in consumers {
            let alive: bool = conn.exists(self.lease_key(&consumer)).await?;
            if !alive {
                orphaned.push(consumer);
            }
        }
        Ok(orphaned)
    }

    async fn stats(&self) -> Result<QueueStats, QueueError> {
        let mut conn = self.connection().await?;
        let pending: u64 = conn.llen(&self.queue).await?;
        let dead_letters: u64 = conn.llen(self.dead_key()).await?;
        Ok(QueueStats { pending, dead_letters })
    }

    async fn health_check(&self) -> Result<(), QueueError> {
        let mut conn = self.connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}
