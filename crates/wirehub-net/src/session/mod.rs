//! Session lifecycle, registry shards and the session manager.

pub mod id;
pub mod manager;
pub mod session;
pub mod shard;

pub use id::{GlobalIdGenerator, IdGenerator, SequentialIdGenerator, SessionId};
pub use manager::Manager;
pub use session::{Session, SessionInfo, KEY_REMOTE_ADDR, KEY_USER_AGENT, MAILBOX_CAPACITY};
