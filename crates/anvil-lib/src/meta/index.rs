use super::entity::{EntityState, MetaEntity};
use super::events::{CatalogEvent, EventBus};
use super::format;
use super::version::Version;
use super::version_list::VersionList;
use crate::error::MetaError;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Default)]
struct IndexInner {
    lists: Vec<Arc<VersionList>>,
    by_uid: HashMap<String, Arc<VersionList>>,
}

/// Root of the catalog: one [`VersionList`] per package uid.
///
/// Construct one and share it; merges are the only writers.
pub struct Index {
    entity: EntityState,
    inner: RwLock<IndexInner>,
    bus: EventBus,
}

impl Default for Index {
    fn default() -> Self {
        Self::new()
    }
}

impl Index {
    pub fn new() -> Self {
        Self {
            entity: EntityState::default(),
            inner: RwLock::new(IndexInner::default()),
            bus: EventBus::new(),
        }
    }

    /// A detached index holding `lists`, as produced by parsing.
    pub fn from_lists(lists: Vec<Arc<VersionList>>) -> Self {
        let index = Self::new();
        {
            let mut inner = index.inner.write();
            for list in lists {
                if inner.by_uid.contains_key(list.uid()) {
                    continue;
                }
                list.set_bus(index.bus.clone());
                inner.by_uid.insert(list.uid().to_string(), list.clone());
                inner.lists.push(list);
            }
        }
        index
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.bus.subscribe()
    }

    pub fn has_uid(&self, uid: &str) -> bool {
        self.inner.read().by_uid.contains_key(uid)
    }

    /// The list for `uid`, created empty the first time an unknown uid is asked for.
    pub fn get(&self, uid: &str) -> Arc<VersionList> {
        if let Some(list) = self.inner.read().by_uid.get(uid) {
            return list.clone();
        }
        let created = {
            let mut inner = self.inner.write();
            if let Some(list) = inner.by_uid.get(uid) {
                return list.clone();
            }
            let list = Arc::new(VersionList::with_bus(uid, self.bus.clone()));
            inner.by_uid.insert(uid.to_string(), list.clone());
            inner.lists.push(list.clone());
            list
        };
        self.bus.emit(CatalogEvent::ListInserted {
            uid: uid.to_string(),
        });
        created
    }

    pub fn get_version(&self, uid: &str, version: &str) -> Arc<Version> {
        self.get(uid).get_version(version)
    }

    pub fn lists(&self) -> Vec<Arc<VersionList>> {
        self.inner.read().lists.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.read().lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_loaded(&self) -> bool {
        self.entity.is_loaded()
    }

    /// Fold a freshly parsed index into this one.
    ///
    /// Known packages only take the catalog-level fields; their `VersionList`
    /// objects are kept. Unknown packages are inserted. An empty index simply
    /// adopts everything.
    pub fn merge(&self, other: &Index) {
        if std::ptr::eq(self, other) {
            return;
        }
        let incoming = other.lists();
        let mut events = Vec::new();
        {
            let mut inner = self.inner.write();
            let first_load = inner.lists.is_empty();
            for list in incoming {
                match inner.by_uid.get(list.uid()).cloned() {
                    Some(existing) => existing.merge_from_index(&list),
                    None => {
                        list.set_bus(self.bus.clone());
                        inner.by_uid.insert(list.uid().to_string(), list.clone());
                        if !first_load {
                            events.push(CatalogEvent::ListInserted {
                                uid: list.uid().to_string(),
                            });
                        }
                        inner.lists.push(list);
                    }
                }
            }
            if first_load {
                events.push(CatalogEvent::IndexReset);
            }
        }
        for event in events {
            self.bus.emit(event);
        }
    }
}

impl MetaEntity for Index {
    fn local_filename(&self) -> String {
        "index.json".to_string()
    }

    fn parse(&self, value: &Value) -> Result<(), MetaError> {
        format::parse_index(value, self)
    }

    fn entity(&self) -> &EntityState {
        &self.entity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(uid: &str, name: &str) -> Arc<VersionList> {
        let list = VersionList::new(uid);
        list.set_name(name);
        Arc::new(list)
    }

    #[test]
    fn test_get_creates_empty_list_once() {
        let index = Index::new();
        let mut events = index.subscribe();
        let a = index.get("net.minecraft");
        let b = index.get("net.minecraft");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.count(), 0);
        assert_eq!(index.len(), 1);
        assert_eq!(
            events.try_recv().unwrap(),
            CatalogEvent::ListInserted {
                uid: "net.minecraft".into()
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_merge_keeps_existing_lists() {
        let index = Index::new();
        index.merge(&Index::from_lists(vec![summary("net.minecraft", "Minecraft")]));
        let held = index.get("net.minecraft");
        let mut events = index.subscribe();

        index.merge(&Index::from_lists(vec![
            summary("net.minecraft", "Minecraft: Java Edition"),
            summary("net.fabricmc.fabric-loader", "Fabric Loader"),
        ]));

        assert!(Arc::ptr_eq(&held, &index.get("net.minecraft")));
        assert_eq!(held.name(), "Minecraft: Java Edition");
        assert_eq!(index.len(), 2);

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(seen.contains(&CatalogEvent::ListInserted {
            uid: "net.fabricmc.fabric-loader".into()
        }));
        assert!(!seen.contains(&CatalogEvent::IndexReset));
    }
}
