/// Test utilities and helpers for Tally testing
///
/// `TestEngine` wires a full engine against in-memory remote and blob
/// stores, a manual clock and a sink that records every notice.

use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

use tally_core::records::{Category, Customer, NotificationKind, Sale, Supplier};
use tally_core::{Currency, EngineConfig, ManualClock, PaymentStatus, RetryPolicy, TenantId};
use tally_sync::{Engine, MemoryBlobStore, MemoryRemote, Notice, NotificationSink};

pub const TENANT: &str = "tenant-1";

/// Install a test-friendly tracing subscriber once; later calls are no-ops
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Sink that keeps every notice for assertions
#[derive(Default)]
pub struct RecordingSink {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingSink {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.notices.lock().iter().filter(|n| n.kind == kind).count()
    }

    pub fn clear(&self) {
        self.notices.lock().clear();
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

/// Test engine wrapper that owns its collaborators and temporary directory
pub struct TestEngine {
    pub engine: Engine,
    pub remote: Arc<MemoryRemote>,
    pub blobs: Arc<MemoryBlobStore>,
    pub clock: Arc<ManualClock>,
    pub sink: Arc<RecordingSink>,
    pub path: Option<PathBuf>,
    _temp_dir: Option<TempDir>,
}

impl TestEngine {
    /// Online engine with an in-memory queue store
    pub fn new() -> Self {
        Self::build(None, None, Arc::new(MemoryRemote::new()), Arc::new(MemoryBlobStore::new()))
    }

    /// Engine whose queue lives in a temporary directory
    pub fn durable() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let path = temp_dir.path().to_path_buf();
        Self::build(
            Some(path),
            Some(temp_dir),
            Arc::new(MemoryRemote::new()),
            Arc::new(MemoryBlobStore::new()),
        )
    }

    /// Drop the engine and build a new one over the same queue directory and remote
    pub fn reopen(self) -> Self {
        let TestEngine {
            engine,
            remote,
            blobs,
            path,
            _temp_dir,
            ..
        } = self;
        drop(engine);
        Self::build(path, _temp_dir, remote, blobs)
    }

    fn build(
        path: Option<PathBuf>,
        temp_dir: Option<TempDir>,
        remote: Arc<MemoryRemote>,
        blobs: Arc<MemoryBlobStore>,
    ) -> Self {
        init_tracing();
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let sink = Arc::new(RecordingSink::default());

        let mut config = EngineConfig::default().with_retry_policy(RetryPolicy::no_retry());
        if let Some(path) = &path {
            config = config.with_store_path(path.clone());
        }

        let engine = Engine::builder()
            .config(config)
            .clock(clock.clone())
            .remote(remote.clone())
            .blobs(blobs.clone())
            .sink(sink.clone())
            .tenant(TenantId::from_str(TENANT))
            .build()
            .expect("Failed to build engine");

        Self {
            engine,
            remote,
            blobs,
            clock,
            sink,
            path,
            _temp_dir: temp_dir,
        }
    }

    /// Lose the connection: the engine sees it and the remote refuses calls
    pub fn go_offline(&self) {
        self.remote.set_online(false);
        self.blobs.set_online(false);
        self.engine.connectivity().set_online(false);
    }

    pub fn go_online(&self) {
        self.remote.set_online(true);
        self.blobs.set_online(true);
        self.engine.connectivity().set_online(true);
    }

    /// Create a category with the given stock and return it
    pub async fn seed_category(&self, name: &str, stock: Decimal) -> Category {
        self.engine
            .inventory()
            .save_category(Category::new(name, stock, Decimal::ONE, Currency::YER))
            .await
            .expect("Failed to save category")
            .into_inner()
    }

    pub async fn seed_customer(&self, name: &str) -> Customer {
        self.engine
            .business()
            .save_customer(Customer::new(name, "777000000"))
            .await
            .expect("Failed to save customer")
            .into_inner()
    }

    pub async fn seed_supplier(&self, name: &str) -> Supplier {
        self.engine
            .business()
            .save_supplier(Supplier::new(name, "733000000"))
            .await
            .expect("Failed to save supplier")
            .into_inner()
    }

    /// Current stock of a category as the UI sees it
    pub fn stock(&self, category: &str) -> Decimal {
        self.engine
            .inventory()
            .available(category)
            .expect("Unknown category")
    }
}

impl Default for TestEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// A credit sale of `quantity` units at a unit price of 10
pub fn credit_sale(customer: &Customer, category: &str, quantity: Decimal) -> Sale {
    Sale::new(
        customer.id.clone(),
        customer.name.clone(),
        category,
        quantity,
        Decimal::TEN,
        PaymentStatus::Credit,
        Currency::YER,
    )
}
