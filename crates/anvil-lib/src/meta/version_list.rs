use super::entity::{EntityState, MetaEntity};
use super::events::{CatalogEvent, EventBus};
use super::format;
use super::version::Version;
use crate::error::MetaError;
use crate::version::BaseVersion;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;

#[derive(Default)]
struct ListInner {
    name: String,
    versions: Vec<Arc<Version>>,
    /// Every version ever handed out, listed or not.
    lookup: HashMap<String, Arc<Version>>,
    recommended: Option<Arc<Version>>,
}

/// All known versions of one package.
pub struct VersionList {
    uid: String,
    entity: EntityState,
    inner: RwLock<ListInner>,
    bus: RwLock<EventBus>,
}

impl VersionList {
    pub fn new(uid: impl Into<String>) -> Self {
        Self::with_bus(uid, EventBus::new())
    }

    pub(crate) fn with_bus(uid: impl Into<String>, bus: EventBus) -> Self {
        Self {
            uid: uid.into(),
            entity: EntityState::default(),
            inner: RwLock::new(ListInner::default()),
            bus: RwLock::new(bus),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn name(&self) -> String {
        self.inner.read().name.clone()
    }

    pub fn human_readable(&self) -> String {
        let name = self.name();
        if name.is_empty() {
            self.uid.clone()
        } else {
            name
        }
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.inner.write().name = name.into();
        self.emit(CatalogEvent::ListChanged {
            uid: self.uid.clone(),
        });
    }

    pub fn sha256(&self) -> String {
        self.entity.sha256()
    }

    pub fn set_sha256(&self, sha256: impl Into<String>) {
        self.entity.set_sha256(sha256);
    }

    pub fn is_loaded(&self) -> bool {
        self.entity.is_loaded()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CatalogEvent> {
        self.bus.read().subscribe()
    }

    /// The version object for `version`, created as an empty stub on first use.
    ///
    /// Repeated calls always hand back the same object.
    pub fn get_version(&self, version: &str) -> Arc<Version> {
        if let Some(found) = self.inner.read().lookup.get(version) {
            return found.clone();
        }
        let mut inner = self.inner.write();
        inner
            .lookup
            .entry(version.to_string())
            .or_insert_with(|| Arc::new(Version::new(self.uid.clone(), version)))
            .clone()
    }

    /// Whether `version` is part of the listing (stubs don't count).
    pub fn has_version(&self, version: &str) -> bool {
        self.find(version).is_some()
    }

    pub fn find(&self, version: &str) -> Option<Arc<Version>> {
        self.inner
            .read()
            .versions
            .iter()
            .find(|v| v.version() == version)
            .cloned()
    }

    pub fn versions(&self) -> Vec<Arc<Version>> {
        self.inner.read().versions.clone()
    }

    pub fn count(&self) -> usize {
        self.inner.read().versions.len()
    }

    pub fn at(&self, index: usize) -> Option<BaseVersion> {
        self.inner
            .read()
            .versions
            .get(index)
            .cloned()
            .map(BaseVersion::Catalog)
    }

    pub fn recommended(&self) -> Option<Arc<Version>> {
        self.inner.read().recommended.clone()
    }

    /// The game version a listed version belongs to.
    pub fn parent_version(&self, version: &str) -> Option<String> {
        self.find(version)?.parent_version()
    }

    /// Replace the listing wholesale, newest first.
    ///
    /// The recommended version becomes the newest `release`.
    pub fn set_versions(&self, mut versions: Vec<Arc<Version>>) {
        self.emit(CatalogEvent::ResetBegin {
            uid: self.uid.clone(),
        });
        versions.sort_by(|a, b| b.raw_time().cmp(&a.raw_time()));
        {
            let bus = self.bus.read().clone();
            let mut inner = self.inner.write();
            for version in &versions {
                inner
                    .lookup
                    .insert(version.version().to_string(), version.clone());
                version.attach(bus.clone());
            }
            inner.recommended = versions
                .iter()
                .find(|v| v.type_name() == "release")
                .cloned();
            inner.versions = versions;
        }
        self.emit(CatalogEvent::ResetEnd {
            uid: self.uid.clone(),
        });
    }

    pub fn sort_versions(&self) {
        self.emit(CatalogEvent::ResetBegin {
            uid: self.uid.clone(),
        });
        self.inner
            .write()
            .versions
            .sort_by(|a, b| b.raw_time().cmp(&a.raw_time()));
        self.emit(CatalogEvent::ResetEnd {
            uid: self.uid.clone(),
        });
    }

    /// Catalog-level fields only. Versions arrive through the list's own fetch.
    pub fn merge_from_index(&self, other: &VersionList) {
        if std::ptr::eq(self, other) {
            return;
        }
        let name = other.name();
        if self.name() != name {
            self.set_name(name);
        }
        let sha256 = other.sha256();
        if self.sha256() != sha256 {
            self.set_sha256(sha256);
            self.emit(CatalogEvent::ListChanged {
                uid: self.uid.clone(),
            });
        }
    }

    /// Fold `other` into this list without dropping anything already known.
    ///
    /// Existing versions are updated in place so outstanding `Arc`s stay valid;
    /// new ones are appended in payload order. Observers see the whole merge
    /// as one reset.
    pub fn merge(&self, other: &VersionList) {
        if std::ptr::eq(self, other) {
            return;
        }
        let name = other.name();
        if self.name() != name {
            self.set_name(name);
        }

        let incoming = other.versions();
        if incoming.is_empty() {
            log::warn!("Empty version list loaded for {}", self.uid);
        }

        self.emit(CatalogEvent::ResetBegin {
            uid: self.uid.clone(),
        });
        {
            let bus = self.bus.read().clone();
            let mut inner = self.inner.write();
            let mut recommended = inner.recommended.clone();
            for version in incoming {
                let touched = match inner.lookup.get(version.version()).cloned() {
                    Some(existing) => {
                        existing.merge_from_list(&version);
                        if !inner.versions.iter().any(|v| Arc::ptr_eq(v, &existing)) {
                            existing.attach(bus.clone());
                            inner.versions.push(existing.clone());
                        }
                        existing
                    }
                    None => {
                        version.attach(bus.clone());
                        inner
                            .lookup
                            .insert(version.version().to_string(), version.clone());
                        inner.versions.push(version.clone());
                        version
                    }
                };
                recommended = get_better_version(recommended, Some(touched));
            }
            inner.recommended = recommended;
        }
        self.emit(CatalogEvent::ResetEnd {
            uid: self.uid.clone(),
        });
    }

    pub(crate) fn set_bus(&self, bus: EventBus) {
        for version in self.inner.read().versions.iter() {
            version.attach(bus.clone());
        }
        *self.bus.write() = bus;
    }

    fn emit(&self, event: CatalogEvent) {
        self.bus.read().emit(event);
    }
}

impl MetaEntity for VersionList {
    fn local_filename(&self) -> String {
        format!("{}/index.json", self.uid)
    }

    fn parse(&self, value: &Value) -> Result<(), MetaError> {
        format::parse_version_list(value, self)
    }

    fn entity(&self) -> &EntityState {
        &self.entity
    }
}

/// Pick the better of two candidates for "recommended".
///
/// Same type: the newer one. Different types: the `release`.
pub fn get_better_version(
    a: Option<Arc<Version>>,
    b: Option<Arc<Version>>,
) -> Option<Arc<Version>> {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(a), Some(b)) => {
            if a.type_name() == b.type_name() {
                if a.raw_time() > b.raw_time() {
                    Some(a)
                } else {
                    Some(b)
                }
            } else if a.type_name() == "release" {
                Some(a)
            } else {
                Some(b)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn version(uid: &str, id: &str, type_name: &str, time: i64) -> Arc<Version> {
        let v = Version::new(uid, id);
        v.set_type(type_name);
        v.set_time(time);
        Arc::new(v)
    }

    fn list(uid: &str, versions: Vec<Arc<Version>>) -> VersionList {
        let list = VersionList::new(uid);
        list.set_versions(versions);
        list
    }

    #[test]
    fn test_better_version_prefers_release_then_newer() {
        let snapshot = version("x", "s", "snapshot", 100);
        let release = version("x", "r", "release", 50);
        let picked = get_better_version(Some(snapshot.clone()), Some(release.clone())).unwrap();
        assert!(Arc::ptr_eq(&picked, &release));
        let picked = get_better_version(Some(release.clone()), Some(snapshot.clone())).unwrap();
        assert!(Arc::ptr_eq(&picked, &release));

        let newer = version("x", "r2", "release", 60);
        let picked = get_better_version(Some(release), Some(newer.clone())).unwrap();
        assert!(Arc::ptr_eq(&picked, &newer));

        assert!(get_better_version(None, None).is_none());
        let only = get_better_version(None, Some(snapshot.clone())).unwrap();
        assert!(Arc::ptr_eq(&only, &snapshot));
    }

    #[test]
    fn test_set_versions_sorts_and_recommends_first_release() {
        let list = list(
            "net.minecraft",
            vec![
                version("net.minecraft", "1.20", "release", 100),
                version("net.minecraft", "23w01a", "snapshot", 300),
                version("net.minecraft", "1.20.1", "release", 200),
            ],
        );
        let ids: Vec<_> = list
            .versions()
            .iter()
            .map(|v| v.version().to_string())
            .collect();
        assert_eq!(ids, vec!["23w01a", "1.20.1", "1.20"]);
        assert_eq!(list.recommended().unwrap().version(), "1.20.1");
    }

    #[test]
    fn test_stub_is_reused_and_filled_by_merge() {
        let live = VersionList::new("net.minecraft");
        let stub = live.get_version("1.20.1");
        assert!(Arc::ptr_eq(&stub, &live.get_version("1.20.1")));
        assert!(!live.has_version("1.20.1"));

        live.merge(&list(
            "net.minecraft",
            vec![version("net.minecraft", "1.20.1", "release", 200)],
        ));

        assert!(live.has_version("1.20.1"));
        assert!(Arc::ptr_eq(&stub, &live.get_version("1.20.1")));
        assert_eq!(stub.raw_time(), 200);
        assert_eq!(live.count(), 1);
    }

    #[test]
    fn test_merge_emits_one_reset() {
        let live = VersionList::new("net.minecraft");
        let mut events = live.subscribe();
        live.merge(&list(
            "net.minecraft",
            vec![version("net.minecraft", "1.20.1", "release", 200)],
        ));

        assert_eq!(
            events.try_recv().unwrap(),
            CatalogEvent::ResetBegin {
                uid: "net.minecraft".into()
            }
        );
        assert_eq!(
            events.try_recv().unwrap(),
            CatalogEvent::ResetEnd {
                uid: "net.minecraft".into()
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn test_merge_from_index_leaves_versions() {
        let live = list(
            "net.minecraft",
            vec![version("net.minecraft", "1.20.1", "release", 200)],
        );
        let summary = VersionList::new("net.minecraft");
        summary.set_name("Minecraft");
        summary.set_sha256("abc");

        live.merge_from_index(&summary);

        assert_eq!(live.name(), "Minecraft");
        assert_eq!(live.sha256(), "abc");
        assert_eq!(live.count(), 1);
    }
}
