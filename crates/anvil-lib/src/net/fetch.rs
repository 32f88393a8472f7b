use super::meta_cache::{file_mtime_ms, HttpMetaCache, MetaEntry};
use crate::error::NetError;
use parking_lot::{Mutex, MutexGuard};
use reqwest::header::{AGE, CACHE_CONTROL, ETAG, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::{Client, StatusCode};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetMode {
    Offline,
    Online,
}

/// Validators see the body before anything is written to the cache.
pub type Validator<'a> = &'a (dyn Fn(&[u8]) -> Result<(), String> + Send + Sync);

pub struct FetchRequest<'a> {
    pub base: &'a str,
    pub path: &'a str,
    pub url: Url,
    /// Skip the freshness check and always go to the network.
    pub force_stale: bool,
    pub expected_sha256: Option<&'a str>,
}

/// Network access with an on-disk cache in front of it.
pub struct CachedFetcher {
    client: Client,
    cache: Mutex<HttpMetaCache>,
}

impl CachedFetcher {
    pub fn new(client: Client, cache: HttpMetaCache) -> Self {
        Self {
            client,
            cache: Mutex::new(cache),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn cache(&self) -> MutexGuard<'_, HttpMetaCache> {
        self.cache.lock()
    }

    pub fn base_path(&self, base: &str) -> Option<PathBuf> {
        self.cache.lock().base_path(base).map(Path::to_path_buf)
    }

    pub fn resolve(&self, base: &str, path: &str) -> MetaEntry {
        self.cache.lock().resolve_entry(base, path, "")
    }

    /// Return the bytes for `(base, path)`, from disk when the cache entry is
    /// still good, otherwise from `url`.
    ///
    /// A downloaded body is only committed to disk once it passed the checksum
    /// and `validate`.
    pub async fn fetch(
        &self,
        request: FetchRequest<'_>,
        validate: Validator<'_>,
    ) -> Result<Vec<u8>, NetError> {
        let (entry, revalidate) = {
            let mut cache = self.cache.lock();
            if cache.base_path(request.base).is_none() {
                return Err(NetError::UnknownBase(request.base.to_string()));
            }
            let previous = cache.get_entry(request.base, request.path);
            let entry = cache.resolve_entry(request.base, request.path, "");
            (entry, previous)
        };
        let target = entry.full_path();

        if !entry.is_stale() && !request.force_stale {
            match tokio::fs::read(&target).await {
                Ok(bytes) => {
                    validate(&bytes).map_err(NetError::Validation)?;
                    log::debug!("Cache hit for {}/{}", request.base, request.path);
                    return Ok(bytes);
                }
                Err(e) => log::warn!("Cached file {:?} unreadable: {}", target, e),
            }
        }

        // An expired entry whose file is still intact can be revalidated with its ETag.
        let etag = match revalidate.filter(|prev| !request.force_stale && !prev.etag.is_empty()) {
            Some(prev) => match tokio::fs::read(&target).await {
                Ok(bytes) if format!("{:x}", md5::compute(&bytes)) == prev.md5sum => Some(prev.etag),
                _ => None,
            },
            None => None,
        };

        log::debug!("Fetching {}", request.url);
        let mut builder = self.client.get(request.url.clone());
        if let Some(etag) = &etag {
            builder = builder.header(IF_NONE_MATCH, etag.as_str());
        }
        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();

        let bytes = if status == StatusCode::NOT_MODIFIED && etag.is_some() {
            log::debug!("{} not modified, reusing cached copy", request.url);
            tokio::fs::read(&target)
                .await
                .map_err(|e| NetError::io(&target, e))?
        } else if !status.is_success() {
            return Err(NetError::Status {
                url: request.url.to_string(),
                status: status.as_u16(),
            });
        } else {
            response.bytes().await?.to_vec()
        };

        if let Some(expected) = request.expected_sha256 {
            let actual = format!("{:x}", Sha256::digest(&bytes));
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(NetError::Checksum {
                    expected: expected.to_string(),
                    actual,
                });
            }
        }
        validate(&bytes).map_err(NetError::Validation)?;

        // Accepted bodies are returned even when caching them fails.
        if status != StatusCode::NOT_MODIFIED {
            if let Err(e) = write_atomically(&target, &bytes).await {
                log::warn!("Could not cache {}: {}", request.url, e);
                return Ok(bytes);
            }
        }

        let header_str = |name| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let local_changed_timestamp = tokio::fs::metadata(&target)
            .await
            .ok()
            .and_then(|m| file_mtime_ms(&m))
            .unwrap_or(0);
        let fresh = MetaEntry {
            md5sum: format!("{:x}", md5::compute(&bytes)),
            etag: header_str(ETAG).or(etag).unwrap_or_default(),
            remote_changed_timestamp: header_str(LAST_MODIFIED).unwrap_or_default(),
            current_age: header_str(AGE)
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(0),
            max_age: header_str(CACHE_CONTROL)
                .map(|v| parse_max_age(&v))
                .unwrap_or(0),
            local_changed_timestamp,
            stale: false,
            ..entry
        };

        let mut cache = self.cache.lock();
        if let Err(e) = cache.update_entry(fresh).and_then(|_| cache.flush()) {
            log::warn!("Could not record cache entry for {}: {}", request.url, e);
        }
        Ok(bytes)
    }
}

async fn write_atomically(target: &Path, bytes: &[u8]) -> Result<(), NetError> {
    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| NetError::io(parent, e))?;
    }
    let mut tmp_name = target.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".part");
    let tmp = target.with_file_name(tmp_name);
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| NetError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, target)
        .await
        .map_err(|e| NetError::io(target, e))
}

/// `max-age` from a Cache-Control header, in seconds.
fn parse_max_age(header: &str) -> i64 {
    header
        .split(',')
        .filter_map(|part| part.trim().strip_prefix("max-age="))
        .find_map(|v| v.trim().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_max_age() {
        assert_eq!(parse_max_age("public, max-age=300"), 300);
        assert_eq!(parse_max_age("no-cache"), 0);
        assert_eq!(parse_max_age("max-age=abc, max-age=5"), 5);
    }
}
