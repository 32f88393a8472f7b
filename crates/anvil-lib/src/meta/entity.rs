//! Local-then-remote load protocol shared by every catalog entity.

use super::index::Index;
use super::version::Version;
use super::version_list::VersionList;
use crate::config::LauncherConfig;
use crate::error::MetaError;
use crate::net::{CachedFetcher, FetchRequest, HttpMetaCache, NetMode};
use parking_lot::Mutex;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Cache base that catalog files are stored under.
pub const META_BASE: &str = "meta";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LoadStatus {
    #[default]
    NotLoaded,
    Local,
    Remote,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum UpdateStatus {
    #[default]
    NotDone,
    InProgress,
    Failed,
    Succeeded,
}

#[derive(Debug, Default)]
struct EntityInner {
    load_status: LoadStatus,
    update_status: UpdateStatus,
    /// Checksum announced by the parent listing.
    sha256: String,
    /// Checksum of the file the current data came from.
    file_sha256: String,
}

/// Load bookkeeping embedded in every entity.
#[derive(Default)]
pub struct EntityState {
    inner: Mutex<EntityInner>,
    load_lock: tokio::sync::Mutex<()>,
}

impl EntityState {
    pub fn load_status(&self) -> LoadStatus {
        self.inner.lock().load_status
    }

    pub fn update_status(&self) -> UpdateStatus {
        self.inner.lock().update_status
    }

    pub fn sha256(&self) -> String {
        self.inner.lock().sha256.clone()
    }

    pub fn set_sha256(&self, sha256: impl Into<String>) {
        self.inner.lock().sha256 = sha256.into();
    }

    pub fn file_sha256(&self) -> String {
        self.inner.lock().file_sha256.clone()
    }

    /// Loaded means: fetched remotely when no checksum is known, otherwise
    /// some data is present and it matches the announced checksum.
    pub fn is_loaded(&self) -> bool {
        let inner = self.inner.lock();
        if inner.sha256.is_empty() {
            inner.load_status == LoadStatus::Remote
        } else {
            inner.load_status != LoadStatus::NotLoaded && inner.sha256 == inner.file_sha256
        }
    }

    pub fn is_loading(&self) -> bool {
        self.update_status() == UpdateStatus::InProgress
    }

    /// Forget where the data came from so the next load starts over.
    pub fn invalidate(&self) {
        let mut inner = self.inner.lock();
        inner.load_status = LoadStatus::NotLoaded;
        inner.file_sha256.clear();
    }

    fn set_load_status(&self, status: LoadStatus) {
        self.inner.lock().load_status = status;
    }

    fn set_update_status(&self, status: UpdateStatus) {
        self.inner.lock().update_status = status;
    }

    fn set_file_sha256(&self, sha256: impl Into<String>) {
        self.inner.lock().file_sha256 = sha256.into();
    }
}

/// Something stored as one JSON file in the catalog cache.
pub trait MetaEntity: Send + Sync {
    /// Path relative to the catalog root, also used to build the download URL.
    fn local_filename(&self) -> String;
    /// Merge a decoded document into `self`.
    fn parse(&self, value: &Value) -> Result<(), MetaError>;
    fn entity(&self) -> &EntityState;
}

/// Drives [`MetaEntity`] loads against the local catalog directory and the
/// metadata server.
pub struct MetaLoader {
    fetcher: Arc<CachedFetcher>,
    base_url: Url,
    meta_dir: PathBuf,
}

impl MetaLoader {
    pub fn new(fetcher: Arc<CachedFetcher>, base_url: &str) -> Result<Self, MetaError> {
        let meta_dir = fetcher.base_path(META_BASE).ok_or_else(|| {
            MetaError::parse(format!("cache has no '{}' base registered", META_BASE))
        })?;
        // Relative joins drop the last segment unless the base ends in '/'.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let base_url = Url::parse(&normalized)
            .map_err(|e| MetaError::parse(format!("invalid metadata URL {}: {}", base_url, e)))?;
        Ok(Self {
            fetcher,
            base_url,
            meta_dir,
        })
    }

    /// Wire up the cache, fetcher and loader from settings.
    pub fn from_config(config: &LauncherConfig) -> anyhow::Result<Self> {
        let mut cache = HttpMetaCache::new(Some(config.cache_index_path()));
        cache.add_base(META_BASE, config.meta_dir());
        cache.load();
        let fetcher = Arc::new(CachedFetcher::new(config.http_client()?, cache));
        Ok(Self::new(fetcher, config.effective_meta_url())?)
    }

    pub fn fetcher(&self) -> &Arc<CachedFetcher> {
        &self.fetcher
    }

    pub fn meta_dir(&self) -> &Path {
        &self.meta_dir
    }

    pub fn url_for(&self, entity: &dyn MetaEntity) -> Result<Url, MetaError> {
        let filename = entity.local_filename();
        self.base_url
            .join(&filename)
            .map_err(|e| MetaError::parse(format!("cannot build URL for {}: {}", filename, e)))
    }

    pub fn local_path(&self, entity: &dyn MetaEntity) -> PathBuf {
        self.meta_dir.join(entity.local_filename())
    }

    /// Load `entity`, first from disk and then, when online and needed, from
    /// the server.
    ///
    /// A local file that fails to read or parse is deleted. A remote body is
    /// only written to the cache after it parsed. Concurrent calls for the
    /// same entity share one load.
    pub async fn load(&self, entity: &dyn MetaEntity, mode: NetMode) -> Result<(), MetaError> {
        let state = entity.entity();
        let filename = entity.local_filename();
        let _guard = match state.load_lock.try_lock() {
            Ok(guard) => guard,
            Err(_) => {
                log::debug!("Waiting for in-flight load of {}", filename);
                let _wait = state.load_lock.lock().await;
                return match state.update_status() {
                    UpdateStatus::Failed => Err(MetaError::LoadFailed(filename)),
                    _ => Ok(()),
                };
            }
        };

        let path = self.meta_dir.join(&filename);
        let mut hash_matches = false;
        if path.is_file() {
            if let Err(e) = self.load_local(entity, &path, mode, &mut hash_matches) {
                log::debug!("Unable to parse file {:?}: {}", path, e);
                if let Err(e) = std::fs::remove_file(&path) {
                    log::warn!("Failed to delete bad metadata file {:?}: {}", path, e);
                }
                state.invalidate();
            }
        }

        if mode == NetMode::Offline {
            return Ok(());
        }

        let expected = state.sha256();
        let was_loaded_remote = if expected.is_empty() {
            state.load_status() == LoadStatus::Remote
        } else {
            hash_matches
        };
        if was_loaded_remote {
            return Ok(());
        }

        state.set_update_status(UpdateStatus::InProgress);
        let url = match self.url_for(entity) {
            Ok(url) => url,
            Err(e) => {
                state.set_update_status(UpdateStatus::Failed);
                return Err(e);
            }
        };
        log::info!("Downloading meta file {}", filename);

        let parse_body = |bytes: &[u8]| -> Result<(), String> {
            let value: Value = serde_json::from_slice(bytes)
                .map_err(|e| format!("Unable to parse response: {}", e))?;
            entity.parse(&value).map_err(|e| e.to_string())
        };
        let request = FetchRequest {
            base: META_BASE,
            path: &filename,
            url,
            force_stale: true,
            expected_sha256: (!expected.is_empty()).then_some(expected.as_str()),
        };

        let result = self.fetcher.fetch(request, &parse_body).await;
        match result {
            Ok(_) => {
                state.set_load_status(LoadStatus::Remote);
                state.set_file_sha256(expected);
                state.set_update_status(UpdateStatus::Succeeded);
                Ok(())
            }
            Err(e) => {
                log::warn!("Failed to update {}: {}", filename, e);
                state.set_update_status(UpdateStatus::Failed);
                Err(e.into())
            }
        }
    }

    fn load_local(
        &self,
        entity: &dyn MetaEntity,
        path: &Path,
        mode: NetMode,
        hash_matches: &mut bool,
    ) -> Result<(), MetaError> {
        let state = entity.entity();
        let mut bytes = None;
        if state.load_status() == LoadStatus::NotLoaded || state.file_sha256().is_empty() {
            let data = std::fs::read(path).map_err(|e| MetaError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
            state.set_file_sha256(format!("{:x}", Sha256::digest(&data)));
            bytes = Some(data);
        }

        let expected = state.sha256();
        *hash_matches = expected == state.file_sha256();
        if mode == NetMode::Online && !expected.is_empty() && !*hash_matches {
            return Err(MetaError::parse("mismatched checksum"));
        }

        if state.load_status() == LoadStatus::NotLoaded {
            let data = match bytes {
                Some(data) => data,
                None => std::fs::read(path).map_err(|e| MetaError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?,
            };
            let value: Value = serde_json::from_slice(&data)
                .map_err(|e| MetaError::json(entity.local_filename(), e))?;
            entity.parse(&value)?;
            state.set_load_status(LoadStatus::Local);
        }
        Ok(())
    }

    /// Load with an upper bound on how long the caller waits.
    ///
    /// Returns whether any data is available afterwards; running out of time
    /// is not an error.
    pub async fn load_with_timeout(
        &self,
        entity: &dyn MetaEntity,
        mode: NetMode,
        timeout: Duration,
    ) -> bool {
        match tokio::time::timeout(timeout, self.load(entity, mode)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => log::warn!("Loading {} failed: {}", entity.local_filename(), e),
            Err(_) => log::warn!(
                "{} did not load within {:?}, continuing without it",
                entity.local_filename(),
                timeout
            ),
        }
        entity.entity().load_status() != LoadStatus::NotLoaded
    }

    pub async fn load_index(&self, index: &Index, mode: NetMode) -> Result<(), MetaError> {
        self.load(index, mode).await
    }

    /// Load one package listing. The index is tried first so the listing's
    /// checksum is known; an index failure is tolerated.
    pub async fn load_list(
        &self,
        index: &Index,
        uid: &str,
        mode: NetMode,
    ) -> Result<Arc<VersionList>, MetaError> {
        if index.entity().load_status() == LoadStatus::NotLoaded {
            if let Err(e) = self.load(index, mode).await {
                log::warn!("Catalog index unavailable, loading {} without it: {}", uid, e);
            }
        }
        let list = index.get(uid);
        self.load(list.as_ref(), mode).await?;
        Ok(list)
    }

    pub async fn load_version(
        &self,
        index: &Index,
        uid: &str,
        version: &str,
        mode: NetMode,
    ) -> Result<Arc<Version>, MetaError> {
        let list = self.load_list(index, uid, mode).await?;
        let version = list.get_version(version);
        self.load(version.as_ref(), mode).await?;
        Ok(version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_loaded_without_checksum_needs_remote() {
        let state = EntityState::default();
        assert!(!state.is_loaded());
        state.set_load_status(LoadStatus::Local);
        assert!(!state.is_loaded());
        state.set_load_status(LoadStatus::Remote);
        assert!(state.is_loaded());
    }

    #[test]
    fn test_is_loaded_with_checksum_needs_match() {
        let state = EntityState::default();
        state.set_sha256("abc");
        state.set_load_status(LoadStatus::Local);
        state.set_file_sha256("def");
        assert!(!state.is_loaded());
        state.set_file_sha256("abc");
        assert!(state.is_loaded());

        state.invalidate();
        assert!(!state.is_loaded());
        assert_eq!(state.load_status(), LoadStatus::NotLoaded);
    }
}
