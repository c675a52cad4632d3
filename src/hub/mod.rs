// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Notification Hub
//!
//! Owns the set of live subscribers and fans notifications out to them.
//!
//! ## Delivery Model
//!
//! Every subscriber has its own bounded outbound queue. A broadcast takes a
//! snapshot of the registry, pushes into each queue and returns; it never
//! waits on a consumer. When a queue is full its oldest message is dropped,
//! so a stalled consumer loses its own backlog and nobody else's.
//!
//! ## Lifecycle
//!
//! `Connected` → `Disconnecting` (explicit close or failed send) →
//! `Removed`. A removed subscriber's queue is released and its stream
//! ends. Dropping a [`Subscriber`] removes it as well.
//!
//! ## Idempotent Forwarding
//!
//! The hub remembers the ids of recently broadcast notifications and
//! ignores repeats, so producers may re-forward after a partial failure.

use std::collections::{HashMap, VecDeque};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use lru::LruCache;
use tokio::sync::Notify;
use uuid::Uuid;

use crate::models::Notification;

/// Outbound queue size used when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// How many broadcast ids are remembered for de-duplication.
const RECENT_IDS_CAPACITY: usize = 4096;

/// Per-subscriber connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriberState {
    Connected,
    Disconnecting,
    Removed,
}

/// Outcome of a broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Subscribers the notification was queued for.
    pub delivered: usize,
    /// Subscribers that had to drop their oldest message to make room.
    pub overflowed: usize,
    /// The id had already been broadcast; nothing was queued.
    pub duplicate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HubError {
    #[error("notification hub is closed")]
    Closed,
}

struct OutboxState {
    queue: VecDeque<Arc<Notification>>,
    state: SubscriberState,
    dropped: u64,
}

struct Outbox {
    inner: Mutex<OutboxState>,
    notify: Notify,
    capacity: usize,
}

impl Outbox {
    fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(OutboxState {
                queue: VecDeque::with_capacity(capacity),
                state: SubscriberState::Connected,
                dropped: 0,
            }),
            notify: Notify::new(),
            capacity,
        }
    }

    fn lock(&self) -> MutexGuard<'_, OutboxState> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Queue a message; returns `None` if the subscriber is gone, otherwise
    /// whether the oldest message was evicted.
    fn push(&self, notification: Arc<Notification>) -> Option<bool> {
        let mut inner = self.lock();
        if inner.state != SubscriberState::Connected {
            return None;
        }
        let overflowed = inner.queue.len() >= self.capacity;
        if overflowed {
            inner.queue.pop_front();
            inner.dropped += 1;
        }
        inner.queue.push_back(notification);
        drop(inner);
        self.notify.notify_one();
        Some(overflowed)
    }

    fn set_state(&self, state: SubscriberState) {
        let mut inner = self.lock();
        inner.state = state;
        if state == SubscriberState::Removed {
            inner.queue.clear();
            inner.queue.shrink_to_fit();
        }
        drop(inner);
        self.notify.notify_one();
    }
}

struct HubInner {
    subscribers: RwLock<HashMap<Uuid, Arc<Outbox>>>,
    recent_ids: Mutex<LruCache<Uuid, ()>>,
    queue_capacity: usize,
    closed: AtomicBool,
}

impl HubInner {
    fn remove(&self, connection_id: Uuid) -> bool {
        let outbox = self
            .subscribers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&connection_id);

        match outbox {
            Some(outbox) => {
                outbox.set_state(SubscriberState::Disconnecting);
                outbox.set_state(SubscriberState::Removed);
                tracing::debug!(%connection_id, "Subscriber removed");
                true
            }
            None => false,
        }
    }
}

/// Registry of live subscribers. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

impl NotificationHub {
    /// Create a hub whose subscribers each buffer up to `queue_capacity`
    /// undelivered messages.
    pub fn new(queue_capacity: usize) -> Self {
        let recent = NonZeroUsize::new(RECENT_IDS_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(HubInner {
                subscribers: RwLock::new(HashMap::new()),
                recent_ids: Mutex::new(LruCache::new(recent)),
                queue_capacity: queue_capacity.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> Result<Subscriber, HubError> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }

        let connection_id = Uuid::new_v4();
        let outbox = Arc::new(Outbox::new(self.inner.queue_capacity));
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(connection_id, outbox.clone());

        tracing::debug!(%connection_id, "Subscriber connected");

        Ok(Subscriber {
            connection_id,
            outbox,
            hub: Arc::downgrade(&self.inner),
        })
    }

    /// Remove a subscriber and release its queue. Returns `false` if it was
    /// already gone.
    pub fn unsubscribe(&self, connection_id: Uuid) -> bool {
        self.inner.remove(connection_id)
    }

    /// Queue `notification` for every connected subscriber.
    pub fn broadcast(&self, notification: Notification) -> Result<BroadcastReport, HubError> {
        if self.is_closed() {
            return Err(HubError::Closed);
        }

        {
            let mut recent = self
                .inner
                .recent_ids
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            if recent.put(notification.id, ()).is_some() {
                tracing::debug!(id = %notification.id, "Skipping already broadcast notification");
                return Ok(BroadcastReport {
                    duplicate: true,
                    ..Default::default()
                });
            }
        }

        let snapshot: Vec<Arc<Outbox>> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();

        let event = notification.kind.name();
        let notification = Arc::new(notification);
        let mut report = BroadcastReport::default();
        for outbox in snapshot {
            match outbox.push(notification.clone()) {
                Some(overflowed) => {
                    report.delivered += 1;
                    if overflowed {
                        report.overflowed += 1;
                    }
                }
                None => continue,
            }
        }

        if report.overflowed > 0 {
            tracing::warn!(
                event,
                overflowed = report.overflowed,
                "Slow subscribers dropped their oldest notifications"
            );
        }
        tracing::debug!(event, delivered = report.delivered, "Notification broadcast");

        Ok(report)
    }

    /// Number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Refuse further broadcasts and end every subscriber stream.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let ids: Vec<Uuid> = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .keys()
            .copied()
            .collect();
        for id in ids {
            self.inner.remove(id);
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Handle held by a connection. Dropping it unsubscribes.
pub struct Subscriber {
    connection_id: Uuid,
    outbox: Arc<Outbox>,
    hub: Weak<HubInner>,
}

impl Subscriber {
    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn state(&self) -> SubscriberState {
        self.outbox.lock().state
    }

    /// Messages evicted from this subscriber's queue so far.
    pub fn dropped(&self) -> u64 {
        self.outbox.lock().dropped
    }

    /// Messages currently waiting in the queue.
    pub fn pending(&self) -> usize {
        self.outbox.lock().queue.len()
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<Arc<Notification>> {
        self.outbox.lock().queue.pop_front()
    }

    /// Wait for the next notification; `None` once the subscriber is no
    /// longer connected.
    pub async fn recv(&self) -> Option<Arc<Notification>> {
        loop {
            {
                let mut inner = self.outbox.lock();
                if inner.state != SubscriberState::Connected {
                    return None;
                }
                if let Some(notification) = inner.queue.pop_front() {
                    return Some(notification);
                }
            }
            self.outbox.notify.notified().await;
        }
    }
}

impl Drop for Subscriber {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.connection_id);
        }
    }
}
