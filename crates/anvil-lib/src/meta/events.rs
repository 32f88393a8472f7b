use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Structural changes observers of the catalog care about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CatalogEvent {
    /// The index was filled wholesale on its first load.
    IndexReset,
    ListInserted { uid: String },
    /// Shallow list fields (name, checksum) changed.
    ListChanged { uid: String },
    ResetBegin { uid: String },
    ResetEnd { uid: String },
    VersionChanged { uid: String, version: String },
}

/// Fan-out channel for [`CatalogEvent`]s. Cloning shares the channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<CatalogEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: CatalogEvent) {
        // No subscribers is fine.
        let _ = self.tx.send(event);
    }
}
