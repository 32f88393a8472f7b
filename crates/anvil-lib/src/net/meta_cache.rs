//! On-disk index of fetched files and their freshness metadata.
//!
//! Every cached file lives under a named base directory. The index remembers
//! the md5 of what was written, the server ETag and cache-control age so a
//! later lookup can tell whether the local copy can still be trusted.

use crate::error::NetError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

const INDEX_VERSION: &str = "1";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetaEntry {
    pub base_id: String,
    pub base_path: PathBuf,
    pub relative_path: String,
    pub md5sum: String,
    pub etag: String,
    /// mtime of the local file in milliseconds when the entry was last verified.
    pub local_changed_timestamp: i64,
    /// Raw `Last-Modified` header value.
    pub remote_changed_timestamp: String,
    /// Seconds, as reported by the server at fetch time.
    pub current_age: i64,
    pub max_age: i64,
    pub eternal: bool,
    pub stale: bool,
}

impl MetaEntry {
    pub fn full_path(&self) -> PathBuf {
        self.base_path.join(&self.relative_path)
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn set_stale(&mut self, stale: bool) {
        self.stale = stale;
    }

    /// True when the cache-control lifetime has run out.
    pub fn is_expired(&self, now_ms: i64) -> bool {
        if self.eternal || self.max_age <= 0 {
            return false;
        }
        let elapsed = (now_ms - self.local_changed_timestamp).max(0) / 1000;
        self.current_age + elapsed >= self.max_age
    }
}

#[derive(Serialize, Deserialize)]
struct IndexFile {
    version: String,
    #[serde(default)]
    entries: Vec<EntryRecord>,
}

#[derive(Serialize, Deserialize)]
struct EntryRecord {
    base: String,
    path: String,
    #[serde(default)]
    md5sum: String,
    #[serde(default)]
    etag: String,
    #[serde(default)]
    last_changed_timestamp: f64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    remote_changed_timestamp: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    eternal: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    current_age: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_age: Option<i64>,
}

#[derive(Default)]
struct EntryMap {
    base_path: PathBuf,
    entries: HashMap<String, MetaEntry>,
}

pub struct HttpMetaCache {
    index_file: Option<PathBuf>,
    bases: HashMap<String, EntryMap>,
    dirty: bool,
}

impl HttpMetaCache {
    /// Cache backed by an index file. `None` keeps everything in memory.
    pub fn new(index_file: Option<PathBuf>) -> Self {
        Self {
            index_file,
            bases: HashMap::new(),
            dirty: false,
        }
    }

    /// Register a base directory. Re-adding an existing base is ignored.
    pub fn add_base(&mut self, base: &str, root: impl Into<PathBuf>) {
        if self.bases.contains_key(base) {
            return;
        }
        self.bases.insert(
            base.to_string(),
            EntryMap {
                base_path: root.into(),
                entries: HashMap::new(),
            },
        );
    }

    pub fn base_path(&self, base: &str) -> Option<&Path> {
        self.bases.get(base).map(|b| b.base_path.as_path())
    }

    pub fn get_entry(&self, base: &str, path: &str) -> Option<MetaEntry> {
        self.bases.get(base)?.entries.get(path).cloned()
    }

    /// Look up an entry and check it against the file on disk.
    ///
    /// Anything that cannot be verified is disowned and a stale stub returned
    /// in its place.
    pub fn resolve_entry(&mut self, base: &str, path: &str, expected_etag: &str) -> MetaEntry {
        let Some(selected) = self.bases.get_mut(base) else {
            return self.stale_entry(base, path);
        };
        let Some(entry) = selected.entries.get_mut(path) else {
            return self.stale_entry(base, path);
        };

        let real_path = selected.base_path.join(path);
        let mtime = match std::fs::metadata(&real_path) {
            Ok(meta) if meta.is_file() => file_mtime_ms(&meta),
            _ => None,
        };
        let Some(mtime) = mtime else {
            log::debug!("Cache file missing for {}/{}, disowning entry", base, path);
            selected.entries.remove(path);
            return self.stale_entry(base, path);
        };

        if !expected_etag.is_empty() && expected_etag != entry.etag {
            log::debug!("ETag mismatch for {}/{}, disowning entry", base, path);
            selected.entries.remove(path);
            return self.stale_entry(base, path);
        }

        if mtime != entry.local_changed_timestamp {
            let md5sum = match std::fs::read(&real_path) {
                Ok(bytes) => format!("{:x}", md5::compute(&bytes)),
                Err(e) => {
                    log::warn!("Failed to read cached file {:?}: {}", real_path, e);
                    String::new()
                }
            };
            if md5sum.is_empty() || md5sum != entry.md5sum {
                log::debug!("Checksum mismatch for {}/{}, disowning entry", base, path);
                selected.entries.remove(path);
                return self.stale_entry(base, path);
            }
            entry.local_changed_timestamp = mtime;
            self.dirty = true;
        }

        if entry.is_expired(now_ms()) {
            log::debug!("Cache entry {}/{} outlived its max-age", base, path);
            selected.entries.remove(path);
            return self.stale_entry(base, path);
        }

        entry.base_path = selected.base_path.clone();
        entry.clone()
    }

    /// Store a freshly validated entry. Stale entries and unknown bases are refused.
    pub fn update_entry(&mut self, entry: MetaEntry) -> Result<(), NetError> {
        let Some(selected) = self.bases.get_mut(&entry.base_id) else {
            log::error!("Cannot add entry with unknown base: {}", entry.base_id);
            return Err(NetError::UnknownBase(entry.base_id));
        };
        if entry.stale {
            log::error!("Cannot add stale entry: {:?}", entry.full_path());
            return Err(NetError::Validation(format!(
                "refusing to store stale cache entry {}",
                entry.relative_path
            )));
        }
        selected.entries.insert(entry.relative_path.clone(), entry);
        self.save_eventually();
        Ok(())
    }

    pub fn evict_entry(&mut self, base: &str, path: &str) -> bool {
        match self
            .bases
            .get_mut(base)
            .and_then(|b| b.entries.get_mut(path))
        {
            Some(entry) => {
                entry.stale = true;
                self.save_eventually();
                true
            }
            None => false,
        }
    }

    pub fn stale_entry(&self, base: &str, path: &str) -> MetaEntry {
        MetaEntry {
            base_id: base.to_string(),
            base_path: self
                .base_path(base)
                .map(Path::to_path_buf)
                .unwrap_or_default(),
            relative_path: path.to_string(),
            stale: true,
            ..Default::default()
        }
    }

    /// Read the index file. Entries for bases that were not registered are dropped.
    pub fn load(&mut self) {
        let Some(index_file) = &self.index_file else {
            return;
        };
        let bytes = match std::fs::read(index_file) {
            Ok(bytes) => bytes,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    log::warn!("Failed to read cache index {:?}: {}", index_file, e);
                }
                return;
            }
        };
        let index: IndexFile = match serde_json::from_slice(&bytes) {
            Ok(index) => index,
            Err(e) => {
                log::warn!("Cache index {:?} is malformed: {}", index_file, e);
                return;
            }
        };
        if index.version != INDEX_VERSION {
            log::warn!("Ignoring cache index with version {}", index.version);
            return;
        }

        let mut loaded = 0;
        for record in index.entries {
            let Some(selected) = self.bases.get_mut(&record.base) else {
                continue;
            };
            let entry = MetaEntry {
                base_id: record.base,
                base_path: selected.base_path.clone(),
                relative_path: record.path.clone(),
                md5sum: record.md5sum,
                etag: record.etag,
                local_changed_timestamp: record.last_changed_timestamp as i64,
                remote_changed_timestamp: record.remote_changed_timestamp,
                current_age: record.current_age.unwrap_or(0),
                max_age: record.max_age.unwrap_or(0),
                eternal: record.eternal,
                stale: false,
            };
            selected.entries.insert(record.path, entry);
            loaded += 1;
        }
        log::debug!("Loaded {} cache entries from {:?}", loaded, index_file);
    }

    pub fn save_eventually(&mut self) {
        self.dirty = true;
    }

    /// Write the index if anything changed since the last save.
    pub fn flush(&mut self) -> Result<(), NetError> {
        if self.dirty {
            self.save_now()?;
        }
        Ok(())
    }

    pub fn save_now(&mut self) -> Result<(), NetError> {
        let Some(index_file) = self.index_file.clone() else {
            self.dirty = false;
            return Ok(());
        };

        let mut entries: Vec<EntryRecord> = self
            .bases
            .values()
            .flat_map(|b| b.entries.values())
            .filter(|e| !e.stale)
            .map(|e| EntryRecord {
                base: e.base_id.clone(),
                path: e.relative_path.clone(),
                md5sum: e.md5sum.clone(),
                etag: e.etag.clone(),
                last_changed_timestamp: e.local_changed_timestamp as f64,
                remote_changed_timestamp: e.remote_changed_timestamp.clone(),
                eternal: e.eternal,
                current_age: (!e.eternal).then_some(e.current_age),
                max_age: (!e.eternal).then_some(e.max_age),
            })
            .collect();
        entries.sort_by(|a, b| (&a.base, &a.path).cmp(&(&b.base, &b.path)));

        let index = IndexFile {
            version: INDEX_VERSION.to_string(),
            entries,
        };
        let bytes = serde_json::to_vec_pretty(&index)
            .map_err(|e| NetError::Validation(format!("cannot encode cache index: {}", e)))?;
        if let Some(parent) = index_file.parent() {
            std::fs::create_dir_all(parent).map_err(|e| NetError::io(parent, e))?;
        }
        std::fs::write(&index_file, bytes).map_err(|e| NetError::io(&index_file, e))?;
        self.dirty = false;
        Ok(())
    }
}

impl Drop for HttpMetaCache {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            log::warn!("Failed to save cache index: {}", e);
        }
    }
}

pub(crate) fn file_mtime_ms(meta: &std::fs::Metadata) -> Option<i64> {
    let modified = meta.modified().ok()?;
    let since = modified.duration_since(UNIX_EPOCH).ok()?;
    Some(since.as_millis() as i64)
}

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
