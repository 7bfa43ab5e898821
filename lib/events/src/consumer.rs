use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use async_trait::async_trait;
use futures_util::{pin_mut, Stream, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use followgraph_core::{GraphStore, ShutdownSignal};

use crate::error::EventError;
use crate::event::{EventKind, LifecycleEvent};

// ─────────────────────────────────────────────
// State and settlement
// ─────────────────────────────────────────────

/// Lifecycle of the consumer. `Fatal` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumerState {
    Disconnected,
    Connected,
    Subscribed,
    Consuming,
    Fatal,
}

/// How a delivery is settled with the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Reject and put back on the queue for another attempt.
    Requeue,
    /// Reject without requeue. Routed to the dead-letter exchange when one is configured.
    DeadLetter,
}

/// A message handed to the consumer by some transport.
#[async_trait]
pub trait Delivery: Send + Sized {
    fn routing_key(&self) -> &str;
    fn body(&self) -> &[u8];

    /// Earlier deliveries of this message as counted by the broker, if it
    /// reports them (e.g. `x-delivery-count` on quorum queues).
    fn delivery_count(&self) -> Option<u32> {
        None
    }
    async fn settle(self, disposition: Disposition) -> Result<(), EventError>;
}

/// Why [`EventConsumer::consume`] returned without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeExit {
    Shutdown,
    StreamEnded,
}

// ─────────────────────────────────────────────
// Retry policy
// ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total store attempts for one event before it is dead-lettered.
    pub max_attempts: u32,
    /// Pause before a failed event is handed back to the broker.
    pub requeue_delay: Duration,
    /// Upper bound on events with a local attempt count.
    pub max_tracked: usize,
    /// A local attempt count not touched for this long is forgotten.
    pub attempt_ttl: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            requeue_delay: Duration::from_millis(500),
            max_tracked: 10_000,
            attempt_ttl: Duration::from_secs(600),
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), EventError> {
        if self.max_attempts == 0 {
            return Err(EventError::InvalidConfig("max_attempts must be at least 1".into()));
        }
        if self.max_tracked == 0 {
            return Err(EventError::InvalidConfig("max_tracked must be at least 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acked: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    /// Acked without mutation because the routing key was not recognized.
    pub unrecognized: u64,
}

impl fmt::Display for ConsumerStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "acked={} requeued={} dead_lettered={} unrecognized={}",
            self.acked, self.requeued, self.dead_lettered, self.unrecognized
        )
    }
}

#[derive(Debug, Clone, Copy)]
struct Attempts {
    count: u32,
    last_seen: Instant,
}

// ─────────────────────────────────────────────
// EventConsumer
// ─────────────────────────────────────────────

/// Turns lifecycle events into graph store node mutations.
///
/// ```text
/// delivery --decode--> LifecycleEvent
///   |                       |
///   | malformed             +-- user.created --> store.upsert_node()
///   v                       +-- user.deleted --> store.delete_node()
/// DeadLetter                +-- other        --> Ack, no mutation
/// ```
///
/// A message is acknowledged only once its mutation has succeeded. Transient
/// store failures are requeued until the retry policy is exhausted, then the
/// message is dead-lettered. One bad message never stops the stream.
///
/// The attempt number of a delivery is the larger of the broker's delivery
/// count and a local count. Local counts are bounded by
/// [`RetryPolicy::max_tracked`] and expire after [`RetryPolicy::attempt_ttl`],
/// so events redelivered to another instance, or purged, are not kept forever.
pub struct EventConsumer {
    store: Arc<dyn GraphStore>,
    retry: RetryPolicy,
    attempts: AHashMap<LifecycleEvent, Attempts>,
    stats: ConsumerStats,
    state: watch::Sender<ConsumerState>,
}

impl EventConsumer {
    pub fn new(store: Arc<dyn GraphStore>, retry: RetryPolicy) -> Self {
        let (state, _) = watch::channel(ConsumerState::Disconnected);
        Self {
            store,
            retry,
            attempts: AHashMap::new(),
            stats: ConsumerStats::default(),
            state,
        }
    }

    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    pub fn state(&self) -> ConsumerState {
        *self.state.borrow()
    }

    /// Events currently holding a local attempt count.
    pub fn tracked_attempts(&self) -> usize {
        self.attempts.len()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConsumerState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, next: ConsumerState) {
        let prev = self.state.send_replace(next);
        if prev != next {
            info!(from = ?prev, to = ?next, "consumer state changed");
        }
    }

    /// Decide the settlement for one message, applying its mutation if any.
    pub async fn handle(&mut self, routing_key: &str, body: &[u8]) -> Disposition {
        self.handle_redelivery(routing_key, body, None).await
    }

    /// [`handle`](Self::handle) for a message the broker has already
    /// delivered `prior_deliveries` times.
    pub async fn handle_redelivery(
        &mut self,
        routing_key: &str,
        body: &[u8],
        prior_deliveries: Option<u32>,
    ) -> Disposition {
        debug!(routing_key, "event received");

        let event = match LifecycleEvent::decode(routing_key, body) {
            Ok(event) => event,
            Err(e) => {
                warn!(routing_key, error = %e, "dropping malformed event");
                self.stats.dead_lettered += 1;
                return Disposition::DeadLetter;
            }
        };

        let result = match event.kind {
            EventKind::Created => {
                info!(user_id = event.user_id, "creating user node");
                self.store.upsert_node(event.user_id).await
            }
            EventKind::Deleted => {
                info!(user_id = event.user_id, "deleting user node");
                self.store.delete_node(event.user_id).await
            }
            EventKind::Unrecognized => {
                warn!(routing_key, user_id = event.user_id, "unrecognized routing key");
                self.stats.acked += 1;
                self.stats.unrecognized += 1;
                return Disposition::Ack;
            }
        };

        match result {
            Ok(()) => {
                self.attempts.remove(&event);
                self.stats.acked += 1;
                Disposition::Ack
            }
            Err(e) if e.is_transient() => {
                let local = self.record_attempt(event);
                let attempt = prior_deliveries.map_or(local, |prior| local.max(prior.saturating_add(1)));

                if attempt >= self.retry.max_attempts {
                    self.attempts.remove(&event);
                    error!(?event, attempt, error = %e, "retries exhausted, dead-lettering event");
                    self.stats.dead_lettered += 1;
                    Disposition::DeadLetter
                } else {
                    warn!(?event, attempt, max = self.retry.max_attempts, error = %e, "store failed, requeueing event");
                    if !self.retry.requeue_delay.is_zero() {
                        tokio::time::sleep(self.retry.requeue_delay).await;
                    }
                    self.stats.requeued += 1;
                    Disposition::Requeue
                }
            }
            Err(e) => {
                self.attempts.remove(&event);
                error!(?event, error = %e, "permanent store failure, dead-lettering event");
                self.stats.dead_lettered += 1;
                Disposition::DeadLetter
            }
        }
    }

    fn record_attempt(&mut self, event: LifecycleEvent) -> u32 {
        let now = Instant::now();
        if !self.attempts.contains_key(&event) && self.attempts.len() >= self.retry.max_tracked {
            self.evict(now);
        }

        let ttl = self.retry.attempt_ttl;
        let entry = self.attempts.entry(event).or_insert(Attempts { count: 0, last_seen: now });
        if now.duration_since(entry.last_seen) > ttl {
            entry.count = 0;
        }
        entry.count += 1;
        entry.last_seen = now;
        entry.count
    }

    /// Drop expired counts, then the least recently seen one if still full.
    fn evict(&mut self, now: Instant) {
        let ttl = self.retry.attempt_ttl;
        self.attempts.retain(|_, a| now.duration_since(a.last_seen) <= ttl);

        if self.attempts.len() >= self.retry.max_tracked {
            let oldest = self
                .attempts
                .iter()
                .min_by_key(|(_, a)| a.last_seen)
                .map(|(event, _)| *event);
            if let Some(event) = oldest {
                debug!(?event, "forgetting attempt count");
                self.attempts.remove(&event);
            }
        }
    }

    /// Handle deliveries one at a time until shutdown or the stream ends.
    ///
    /// Shutdown is observed only between messages: the message in hand is
    /// always settled first.
    pub async fn consume<S, D, E>(
        &mut self,
        deliveries: S,
        mut shutdown: ShutdownSignal,
    ) -> Result<ConsumeExit, EventError>
    where
        S: Stream<Item = Result<D, E>>,
        D: Delivery,
        E: fmt::Display,
    {
        pin_mut!(deliveries);
        self.set_state(ConsumerState::Consuming);

        loop {
            if shutdown.is_triggered() {
                return Ok(ConsumeExit::Shutdown);
            }

            let next = tokio::select! {
                biased;
                _ = shutdown.recv() => return Ok(ConsumeExit::Shutdown),
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => return Err(EventError::Broker(e.to_string())),
                None => return Ok(ConsumeExit::StreamEnded),
            };

            let routing_key = delivery.routing_key().to_owned();
            let body = delivery.body().to_vec();
            let prior = delivery.delivery_count();
            let disposition = self.handle_redelivery(&routing_key, &body, prior).await;
            delivery.settle(disposition).await?;
        }
    }
}
