//! One partition of the session registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::id::SessionId;
use super::session::Session;

/// Registry entry with its liveness bookkeeping.
#[derive(Debug)]
pub(crate) struct Item {
    session: Arc<Session>,
    /// Zero never expires.
    expiration: Duration,
    last_live: Mutex<Instant>,
}

impl Item {
    fn new(session: Arc<Session>, expiration: Duration) -> Self {
        Self {
            session,
            expiration,
            last_live: Mutex::new(Instant::now()),
        }
    }

    fn is_expired(&self) -> bool {
        if self.expiration.is_zero() {
            return false;
        }
        self.last_live
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
            > self.expiration
    }

    fn touch(&self) {
        *self.last_live.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }
}

/// A lock-protected map of sessions plus its own expiry sweep.
#[derive(Debug)]
pub(crate) struct Shard {
    index: usize,
    items: RwLock<HashMap<SessionId, Arc<Item>>>,
}

impl Shard {
    pub(crate) fn new(index: usize) -> Arc<Self> {
        Arc::new(Self {
            index,
            items: RwLock::new(HashMap::new()),
        })
    }

    /// Live session for `id`. Expired entries read as absent.
    pub(crate) fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        let items = self.items.read().unwrap_or_else(|e| e.into_inner());
        let item = items.get(&id)?;
        if item.is_expired() {
            warn!(shard = self.index, session_id = id, "Session expired");
            return None;
        }
        Some(item.session.clone())
    }

    pub(crate) fn put(&self, session: Arc<Session>, expiration: Duration) {
        let id = session.id();
        let item = Arc::new(Item::new(session, expiration));
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, item);
    }

    pub(crate) fn delete(&self, id: SessionId) -> bool {
        self.items
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id)
            .is_some()
    }

    pub(crate) fn reset_expire_time(&self, id: SessionId) {
        if let Some(item) = self
            .items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&id)
        {
            item.touch();
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.items.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub(crate) fn sessions(&self) -> Vec<Arc<Session>> {
        self.items
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(|item| item.session.clone())
            .collect()
    }

    /// Deregister every expired session and close it in the background.
    /// Returns how many were expired.
    ///
    /// Each close runs on its own task so a slow codec shutdown or
    /// `on_disconnect` handler cannot hold up the rest of the shard.
    pub(crate) fn sweep(&self) -> usize {
        let expired: Vec<Arc<Session>> = {
            let mut items = self.items.write().unwrap_or_else(|e| e.into_inner());
            let ids: Vec<SessionId> = items
                .iter()
                .filter(|(_, item)| item.is_expired())
                .map(|(id, _)| *id)
                .collect();
            ids.iter()
                .filter_map(|id| items.remove(id))
                .map(|item| item.session.clone())
                .collect()
        };

        for session in &expired {
            warn!(shard = self.index, session_id = session.id(), "Closing expired session");
            let session = session.clone();
            tokio::spawn(async move { session.close().await });
        }
        expired.len()
    }

    /// Run [`Shard::sweep`] every `interval` until `cancel` fires.
    pub(crate) fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let shard: Weak<Self> = Arc::downgrade(self);
        let index = self.index;
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(shard) = shard.upgrade() else { break };
                        let expired = shard.sweep();
                        if expired > 0 {
                            debug!(shard = index, expired, "Sweep finished");
                        }
                    }
                }
            }
            debug!(shard = index, "Sweeper stopped");
        })
    }
}
