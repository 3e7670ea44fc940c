/// Observable connectivity and queue depth
use tokio::sync::watch;
use tracing::info;

/// Online/offline flag the host keeps current; subscribers see every transition.
#[derive(Debug)]
pub struct Connectivity {
    tx: watch::Sender<bool>,
}

impl Connectivity {
    pub fn new(online: bool) -> Self {
        let (tx, _) = watch::channel(online);
        Self { tx }
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn set_online(&self, online: bool) {
        let previous = self.tx.send_replace(online);
        if previous != online {
            info!(online, "Connectivity changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Number of operations waiting in the durable queue
#[derive(Debug)]
pub struct QueueDepth {
    tx: watch::Sender<usize>,
}

impl QueueDepth {
    pub fn new(depth: usize) -> Self {
        let (tx, _) = watch::channel(depth);
        Self { tx }
    }

    pub fn get(&self) -> usize {
        *self.tx.borrow()
    }

    pub fn publish(&self, depth: usize) {
        self.tx.send_if_modified(|current| {
            if *current == depth {
                false
            } else {
                *current = depth;
                true
            }
        });
    }

    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.tx.subscribe()
    }
}
