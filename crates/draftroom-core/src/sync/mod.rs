// Change feed, realtime store synchronization, connection health and the
// offline action queue.

pub mod connection;
pub mod event;
pub mod offline;
pub mod realtime;

pub use connection::{backoff, jittered, reconnect, ConnectionMonitor, ConnectionState, Connector, ReconnectPolicy};
pub use event::{ChangeBatch, ChangeEvent, Operation, Table};
pub use offline::{ActionPriority, DraftAction, OfflineQueue, QueuedAction, ReplayReport};
pub use realtime::{RealtimeSync, SubscriptionHealth, SyncDirective, SyncSettings};
