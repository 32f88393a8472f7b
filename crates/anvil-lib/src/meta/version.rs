use super::entity::{EntityState, MetaEntity};
use super::events::{CatalogEvent, EventBus};
use super::format;
use super::require::RequireSet;
use crate::error::MetaError;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::sync::Arc;

pub const GAME_UID: &str = "net.minecraft";

#[derive(Debug, Clone, Default)]
struct VersionInner {
    type_name: String,
    /// Release time, seconds since the epoch.
    time: i64,
    recommended: bool,
    volatile: bool,
    provides_recommendations: bool,
    requires: RequireSet,
    conflicts: RequireSet,
    data: Option<Arc<Value>>,
}

/// One release of a package.
///
/// `uid` and `version` never change. Everything else is filled in by merges,
/// which is why a `Version` is shared behind an `Arc` and mutated in place.
pub struct Version {
    uid: String,
    version: String,
    entity: EntityState,
    inner: RwLock<VersionInner>,
    bus: RwLock<Option<EventBus>>,
}

impl std::fmt::Debug for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.read();
        f.debug_struct("Version")
            .field("uid", &self.uid)
            .field("version", &self.version)
            .field("type", &inner.type_name)
            .field("time", &inner.time)
            .finish()
    }
}

impl Version {
    pub fn new(uid: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            version: version.into(),
            entity: EntityState::default(),
            inner: RwLock::new(VersionInner::default()),
            bus: RwLock::new(None),
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn descriptor(&self) -> &str {
        &self.version
    }

    /// Display name from the loaded descriptor, else the package uid.
    pub fn name(&self) -> String {
        self.inner
            .read()
            .data
            .as_ref()
            .and_then(|d| d.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.uid.clone())
    }

    pub fn type_name(&self) -> String {
        self.inner.read().type_name.clone()
    }

    pub fn raw_time(&self) -> i64 {
        self.inner.read().time
    }

    pub fn time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.raw_time(), 0).single()
    }

    pub fn is_recommended(&self) -> bool {
        self.inner.read().recommended
    }

    pub fn is_volatile(&self) -> bool {
        self.inner.read().volatile
    }

    pub fn provides_recommendations(&self) -> bool {
        self.inner.read().provides_recommendations
    }

    pub fn requires(&self) -> RequireSet {
        self.inner.read().requires.clone()
    }

    pub fn conflicts(&self) -> RequireSet {
        self.inner.read().conflicts.clone()
    }

    pub fn data(&self) -> Option<Arc<Value>> {
        self.inner.read().data.clone()
    }

    /// The game version this release is built for, from its `net.minecraft` edge.
    pub fn parent_version(&self) -> Option<String> {
        self.inner
            .read()
            .requires
            .get(GAME_UID)
            .map(|r| r.equals.clone())
            .filter(|v| !v.is_empty())
    }

    pub fn set_type(&self, type_name: impl Into<String>) {
        self.inner.write().type_name = type_name.into();
        self.notify();
    }

    pub fn set_time(&self, time: i64) {
        self.inner.write().time = time;
        self.notify();
    }

    pub fn set_recommended(&self, recommended: bool) {
        self.inner.write().recommended = recommended;
    }

    pub fn set_volatile(&self, volatile: bool) {
        self.inner.write().volatile = volatile;
    }

    pub(crate) fn set_provides_recommendations(&self) {
        self.inner.write().provides_recommendations = true;
    }

    pub fn set_requires(&self, requires: RequireSet, conflicts: RequireSet) {
        {
            let mut inner = self.inner.write();
            inner.requires = requires;
            inner.conflicts = conflicts;
        }
        self.notify();
    }

    pub fn set_data(&self, data: Arc<Value>) {
        self.inner.write().data = Some(data);
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

    /// Take the list-level fields of `other`. The descriptor payload is left alone.
    pub fn merge_from_list(&self, other: &Version) {
        if std::ptr::eq(self, other) {
            return;
        }
        let theirs = other.inner.read().clone();
        let changed = {
            let mut ours = self.inner.write();
            let mut changed = false;
            if theirs.provides_recommendations && ours.recommended != theirs.recommended {
                ours.recommended = theirs.recommended;
            }
            if ours.type_name != theirs.type_name {
                ours.type_name = theirs.type_name;
                changed = true;
            }
            if ours.time != theirs.time {
                ours.time = theirs.time;
                changed = true;
            }
            if ours.requires != theirs.requires {
                ours.requires = theirs.requires;
                changed = true;
            }
            if ours.conflicts != theirs.conflicts {
                ours.conflicts = theirs.conflicts;
                changed = true;
            }
            if ours.volatile != theirs.volatile {
                ours.volatile = theirs.volatile;
            }
            changed
        };
        let sha256 = other.sha256();
        if !sha256.is_empty() {
            self.set_sha256(sha256);
        }
        if changed {
            self.notify();
        }
    }

    /// Merge a directly fetched version: list fields, then the payload if it has one.
    pub fn merge(&self, other: &Version) {
        self.merge_from_list(other);
        if let Some(data) = other.data() {
            self.set_data(data);
        }
    }

    /// Short JSON description used by command-line output.
    pub fn summary_json(&self) -> Value {
        let release_time = self.time().map(|t| t.to_rfc3339());
        let inner = self.inner.read();
        let mut obj = json!({
            "uid": self.uid,
            "version": self.version,
            "type": inner.type_name,
            "releaseTime": release_time,
            "recommended": inner.recommended,
        });
        format::serialize_requires(&mut obj, &inner.requires, "requires");
        format::serialize_requires(&mut obj, &inner.conflicts, "conflicts");
        obj
    }

    pub(crate) fn attach(&self, bus: EventBus) {
        *self.bus.write() = Some(bus);
    }

    fn notify(&self) {
        if let Some(bus) = self.bus.read().as_ref() {
            bus.emit(CatalogEvent::VersionChanged {
                uid: self.uid.clone(),
                version: self.version.clone(),
            });
        }
    }
}

impl MetaEntity for Version {
    fn local_filename(&self) -> String {
        format!("{}/{}.json", self.uid, self.version)
    }

    fn parse(&self, value: &Value) -> Result<(), MetaError> {
        format::parse_version(value, self)
    }

    fn entity(&self) -> &EntityState {
        &self.entity
    }
}
