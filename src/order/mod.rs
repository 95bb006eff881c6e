//! # 响应顺序控制模块
//!
//! 同一客户端（remote host）并发发出的多个请求，按到达顺序依次返回响应。
//! 每个请求在进入流水线时登记一个槽位（[`OrderSlot`]），释放时等待自己成为
//! 队首，或在超时后强制释放。槽位被丢弃时自动移除，不会阻塞后续请求。

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

/// Position of one request in its remote host's queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderKey {
    pub remote_host: String,
    pub worker: Uuid,
    pub arrival: Instant,
    ticket: u64,
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.arrival
            .cmp(&other.arrival)
            .then(self.ticket.cmp(&other.ticket))
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
struct HostQueue {
    keys: BTreeSet<OrderKey>,
    notify: Arc<Notify>,
}

#[derive(Debug)]
pub struct OrderEnforcer {
    timeout: RwLock<Option<Duration>>,
    next_ticket: AtomicU64,
    queues: Mutex<HashMap<String, HostQueue>>,
}

impl OrderEnforcer {
    /// `None` disables ordering entirely
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout: RwLock::new(timeout),
            next_ticket: AtomicU64::new(0),
            queues: Mutex::new(HashMap::new()),
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        *self.timeout.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_enabled(&self) -> bool {
        self.timeout().is_some()
    }

    /// Applies to slots released from now on; `None` disables ordering
    pub fn set_timeout(&self, timeout: Option<Duration>) {
        *self.timeout.write().unwrap_or_else(PoisonError::into_inner) = timeout;
    }

    /// Claim the next position for `remote_host`
    pub fn register(self: &Arc<Self>, remote_host: &str) -> OrderSlot {
        if !self.is_enabled() {
            return OrderSlot {
                enforcer: Arc::clone(self),
                key: None,
            };
        }

        let key = OrderKey {
            remote_host: remote_host.to_string(),
            worker: Uuid::new_v4(),
            arrival: Instant::now(),
            ticket: self.next_ticket.fetch_add(1, AtomicOrdering::Relaxed),
        };
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.remote_host.clone())
            .or_default()
            .keys
            .insert(key.clone());

        OrderSlot {
            enforcer: Arc::clone(self),
            key: Some(key),
        }
    }

    /// Requests still queued for `remote_host`
    pub fn pending(&self, remote_host: &str) -> usize {
        self.queues
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(remote_host)
            .map_or(0, |queue| queue.keys.len())
    }

    /// `None` once `key` heads its queue, otherwise the queue's notifier
    fn waiter(&self, key: &OrderKey) -> Option<Arc<Notify>> {
        let queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let queue = queues.get(&key.remote_host)?;
        match queue.keys.first() {
            Some(head) if head != key => Some(Arc::clone(&queue.notify)),
            _ => None,
        }
    }

    fn remove_key(&self, key: &OrderKey) {
        let mut queues = self.queues.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(queue) = queues.get_mut(&key.remote_host) else {
            return;
        };
        queue.keys.remove(key);
        if queue.keys.is_empty() {
            queues.remove(&key.remote_host);
        } else {
            queue.notify.notify_waiters();
        }
    }
}

/// A claimed position. Release it with [`OrderSlot::release`]; dropping it
/// frees the position without waiting.
#[derive(Debug)]
pub struct OrderSlot {
    enforcer: Arc<OrderEnforcer>,
    key: Option<OrderKey>,
}

impl OrderSlot {
    pub fn key(&self) -> Option<&OrderKey> {
        self.key.as_ref()
    }

    /// Wait until this slot heads its queue, then free it.
    /// Returns `false` when the wait timed out and the slot was forced out.
    pub async fn release(mut self) -> bool {
        let Some(key) = self.key.take() else {
            return true;
        };
        let Some(timeout) = self.enforcer.timeout() else {
            self.enforcer.remove_key(&key);
            return true;
        };
        let deadline = Instant::now() + timeout;

        let in_order = loop {
            let Some(notify) = self.enforcer.waiter(&key) else {
                break true;
            };
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.enforcer.waiter(&key).is_none() {
                break true;
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                break false;
            }
        };

        if in_order {
            debug!("Released order slot for {}", key.remote_host);
        } else {
            warn!(
                "Order slot for {} forced out after {:?}",
                key.remote_host, timeout
            );
        }
        self.enforcer.remove_key(&key);
        in_order
    }
}

impl Drop for OrderSlot {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.enforcer.remove_key(&key);
        }
    }
}
