/// Offline-first synchronization for Tally
///
/// Writes go through the record repository, which either reaches the remote
/// store or hands the operation to the durable queue. The optimistic
/// services keep the UI collections current in the meantime, and the
/// drainer replays the queue once the connection returns.

pub mod connectivity;
pub mod drainer;
pub mod engine;
pub mod remote;
pub mod repository;
pub mod services;
pub mod session;
pub mod state;

pub use connectivity::{Connectivity, QueueDepth};
pub use drainer::{DrainFailure, DrainListener, DrainReport, DrainedEntry, Drainer};
pub use engine::{Engine, EngineBuilder};
pub use remote::{
    BlobStore, MemoryBlobStore, MemoryRemote, RemoteError, RemoteStore, SharedBlobStore,
    SharedRemote,
};
pub use repository::{Persisted, Repository, RepositoryDeps};
pub use services::{
    BackupService, BatchOutcome, BusinessService, FinanceService, InventoryService, LogSink,
    Notice, NotificationService, NotificationSink, RestoreReport, SharedSink,
};
pub use session::Session;
pub use state::{Collection, MutationOutcome, SyncStatus, Tracked};
