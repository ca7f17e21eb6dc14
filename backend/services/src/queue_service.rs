use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use async_trait::async_trait;
use layerscope_shared::{ImageQueueMessage, NotificationQueueMessage};
use redis::AsyncCommands;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueName {
    Inspect,
    Size,
    Notify,
}

impl QueueName {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueName::Inspect => "inspect",
            QueueName::Size => "size",
            QueueName::Notify => "notify",
        }
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A received message. It stays invisible to other consumers until its
/// visibility timeout passes; `delete` with the receipt acknowledges it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub body: String,
    pub receipt: String,
}

impl QueueMessage {
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .with_context(|| format!("Malformed queue message: {}", self.body))
    }
}

/// At-least-once work queue. Unacknowledged messages are redelivered.
#[async_trait]
pub trait QueueService: Send + Sync {
    async fn send(&self, queue: QueueName, body: String) -> Result<()>;

    async fn receive(&self, queue: QueueName) -> Result<Option<QueueMessage>>;

    async fn delete(&self, queue: QueueName, message: &QueueMessage) -> Result<()>;
}

impl dyn QueueService {
    pub async fn send_image(&self, queue: QueueName, image_name: &str) -> Result<()> {
        let body = serde_json::to_string(&ImageQueueMessage {
            image_name: image_name.to_string(),
        })?;
        self.send(queue, body).await
    }

    pub async fn send_notification(&self, notification_message_id: i64) -> Result<()> {
        let body = serde_json::to_string(&NotificationQueueMessage {
            notification_message_id,
        })?;
        self.send(QueueName::Notify, body).await
    }
}

/// Wrapper that keeps identical bodies distinct inside redis collections.
#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    id: Uuid,
    body: String,
}

/// Moves expired in-flight envelopes back to the pending list, then pops
/// one and marks it in flight until `ARGV[2]`. Running it as one script keeps
/// a crashed consumer from losing the popped envelope.
const RECEIVE_SCRIPT: &str = r"
local expired = redis.call('ZRANGEBYSCORE', KEYS[2], '-inf', ARGV[1])
for _, raw in ipairs(expired) do
    redis.call('ZREM', KEYS[2], raw)
    redis.call('LPUSH', KEYS[1], raw)
end
local raw = redis.call('RPOP', KEYS[1])
if not raw then
    return false
end
redis.call('ZADD', KEYS[2], ARGV[2], raw)
return raw
";

/// Redis-backed queue: a pending list per queue, plus a sorted set of
/// in-flight envelopes scored by the time they become visible again.
pub struct RedisQueue {
    client: redis::Client,
    prefix: String,
    visibility_timeout: Duration,
    receive_script: redis::Script,
}

impl RedisQueue {
    pub fn new(redis_url: &str, prefix: &str, visibility_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| anyhow::anyhow!("Failed to open redis client: {}", e))?;

        Ok(Self {
            client,
            prefix: prefix.to_string(),
            visibility_timeout,
            receive_script: redis::Script::new(RECEIVE_SCRIPT),
        })
    }

    fn pending_key(&self, queue: QueueName) -> String {
        format!("{}:{}:pending", self.prefix, queue)
    }

    fn in_flight_key(&self, queue: QueueName) -> String {
        format!("{}:{}:inflight", self.prefix, queue)
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[async_trait]
impl QueueService for RedisQueue {
    async fn send(&self, queue: QueueName, body: String) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let envelope = serde_json::to_string(&Envelope {
            id: Uuid::new_v4(),
            body,
        })?;

        let _: () = conn.lpush(self.pending_key(queue), envelope).await?;
        Ok(())
    }

    async fn receive(&self, queue: QueueName) -> Result<Option<QueueMessage>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let pending = self.pending_key(queue);
        let in_flight = self.in_flight_key(queue);
        let now = now_millis();
        let deadline = now + self.visibility_timeout.as_millis() as i64;

        let raw: Option<String> = self
            .receive_script
            .key(pending)
            .key(in_flight)
            .arg(now)
            .arg(deadline)
            .invoke_async(&mut conn)
            .await?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        let envelope: Envelope = serde_json::from_str(&raw)
            .with_context(|| format!("Malformed envelope on {}", queue))?;

        Ok(Some(QueueMessage {
            body: envelope.body,
            receipt: raw,
        }))
    }

    async fn delete(&self, queue: QueueName, message: &QueueMessage) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: () = conn.zrem(self.in_flight_key(queue), &message.receipt).await?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryState {
    pending: VecDeque<String>,
    in_flight: HashMap<String, (String, Instant)>,
}

/// In-process queue with the same visibility semantics as [`RedisQueue`].
pub struct MemoryQueue {
    queues: Mutex<HashMap<QueueName, MemoryState>>,
    visibility_timeout: Duration,
}

impl MemoryQueue {
    pub fn new(visibility_timeout: Duration) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            visibility_timeout,
        }
    }

    /// Messages waiting plus messages received but not yet deleted.
    pub async fn len(&self, queue: QueueName) -> usize {
        let queues = self.queues.lock().await;
        queues
            .get(&queue)
            .map(|state| state.pending.len() + state.in_flight.len())
            .unwrap_or(0)
    }

    pub async fn is_empty(&self, queue: QueueName) -> bool {
        self.len(queue).await == 0
    }
}

#[async_trait]
impl QueueService for MemoryQueue {
    async fn send(&self, queue: QueueName, body: String) -> Result<()> {
        let mut queues = self.queues.lock().await;
        queues.entry(queue).or_default().pending.push_back(body);
        Ok(())
    }

    async fn receive(&self, queue: QueueName) -> Result<Option<QueueMessage>> {
        let mut queues = self.queues.lock().await;
        let state = queues.entry(queue).or_default();
        let now = Instant::now();

        let expired: Vec<String> = state
            .in_flight
            .iter()
            .filter(|(_, (_, deadline))| *deadline <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();
        for receipt in expired {
            if let Some((body, _)) = state.in_flight.remove(&receipt) {
                state.pending.push_back(body);
            }
        }

        let Some(body) = state.pending.pop_front() else {
            return Ok(None);
        };

        let receipt = Uuid::new_v4().to_string();
        state
            .in_flight
            .insert(receipt.clone(), (body.clone(), now + self.visibility_timeout));

        Ok(Some(QueueMessage { body, receipt }))
    }

    async fn delete(&self, queue: QueueName, message: &QueueMessage) -> Result<()> {
        let mut queues = self.queues.lock().await;
        if let Some(state) = queues.get_mut(&queue) {
            state.in_flight.remove(&message.receipt);
        }
        Ok(())
    }
}
