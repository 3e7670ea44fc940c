pub mod error;
pub mod types;
pub mod clock;
pub mod config;
pub mod retry;
pub mod records;
pub mod operation;
pub mod ledger;
pub mod cache;
pub mod store;
pub mod backup;

pub use error::{Error, Result, ValidationError};
pub use types::*;
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use backup::BackupPackage;
pub use config::EngineConfig;
pub use retry::RetryPolicy;
pub use operation::{Operation, OperationDraft, PendingOperation};
pub use records::Record;
pub use store::{FileQueueStore, MemoryQueueStore, QueueStore, SharedQueueStore};
