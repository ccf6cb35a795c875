//! Sharded registry of live sessions.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use wirehub_core::config::SessionConfig;

use crate::protocol::Protocol;

use super::id::{GlobalIdGenerator, IdGenerator, SessionId};
use super::session::Session;
use super::shard::Shard;

/// Width of the id block that maps to a single shard.
const SHARD_BLOCK_BITS: u32 = 12;

/// Tracks sessions by id across independently locked shards.
///
/// Sessions hold a weak handle back to the manager and deregister
/// themselves when they close. Each shard sweeps its own expired entries
/// until the cancellation token passed at construction fires.
pub struct Manager {
    shards: Vec<Arc<Shard>>,
    expiration: Duration,
    ids: Arc<dyn IdGenerator>,
}

impl Manager {
    /// Create a manager with `shard_count` shards.
    ///
    /// A zero `sweep_interval` disables periodic sweeps; expired sessions
    /// are then only hidden from lookups. A zero `expiration` registers
    /// sessions that never expire.
    pub fn new(
        cancel: CancellationToken,
        shard_count: usize,
        sweep_interval: Duration,
        expiration: Duration,
    ) -> Arc<Self> {
        Self::with_id_generator(
            cancel,
            shard_count,
            sweep_interval,
            expiration,
            Arc::new(GlobalIdGenerator),
        )
    }

    /// Like [`Manager::new`] with a custom id source.
    pub fn with_id_generator(
        cancel: CancellationToken,
        shard_count: usize,
        sweep_interval: Duration,
        expiration: Duration,
        ids: Arc<dyn IdGenerator>,
    ) -> Arc<Self> {
        let shard_count = shard_count.max(1);
        let shards: Vec<Arc<Shard>> = (0..shard_count).map(Shard::new).collect();

        if !sweep_interval.is_zero() {
            for shard in &shards {
                shard.spawn_sweeper(sweep_interval, cancel.clone());
            }
        }

        info!(
            shards = shard_count,
            sweep_interval_ms = sweep_interval.as_millis() as u64,
            expiration_ms = expiration.as_millis() as u64,
            "Session manager initialized"
        );

        Arc::new(Self {
            shards,
            expiration,
            ids,
        })
    }

    /// Build a manager from the `session` config section.
    pub fn from_config(config: &SessionConfig, cancel: CancellationToken) -> Arc<Self> {
        Self::new(
            cancel,
            config.shard_count,
            config.sweep_interval(),
            config.expiration(),
        )
    }

    /// Create an unstarted session and register it with the default expiration.
    pub fn new_session(self: &Arc<Self>, protocol: Arc<dyn Protocol>) -> Arc<Session> {
        let session = Session::new(self.ids.next_id(), protocol, Arc::downgrade(self));
        self.add_session(session.clone(), self.expiration);
        session
    }

    /// Register `session`, replacing any entry with the same id.
    pub fn add_session(&self, session: Arc<Session>, expiration: Duration) {
        let id = session.id();
        self.shard(id).put(session, expiration);
        debug!(session_id = id, "Session registered");
    }

    /// Look up a live session.
    pub fn get_session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.shard(id).get(id)
    }

    /// Remove a session. Unknown ids are ignored.
    pub fn del_session(&self, id: SessionId) {
        if self.shard(id).delete(id) {
            debug!(session_id = id, "Session deregistered");
        }
    }

    /// Refresh the liveness timestamp of a session.
    pub fn reset_expire_time(&self, id: SessionId) {
        self.shard(id).reset_expire_time(id);
    }

    /// Shard an id is stored in: blocks of 4096 consecutive ids share a shard.
    pub fn shard_index(&self, id: SessionId) -> usize {
        ((id >> SHARD_BLOCK_BITS) % self.shards.len() as u64) as usize
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Number of registered sessions, expired or not.
    pub fn session_count(&self) -> usize {
        self.shards.iter().map(|s| s.len()).sum()
    }

    /// Close every registered session.
    pub async fn close_all(&self) {
        let sessions: Vec<Arc<Session>> =
            self.shards.iter().flat_map(|s| s.sessions()).collect();
        let count = sessions.len();
        for session in sessions {
            session.close().await;
        }
        info!(closed = count, "Closed all sessions");
    }

    fn shard(&self, id: SessionId) -> &Shard {
        &self.shards[self.shard_index(id)]
    }
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("shards", &self.shards.len())
            .field("expiration", &self.expiration)
            .finish()
    }
}
