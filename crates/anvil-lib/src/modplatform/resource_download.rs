use super::resource::DISABLED_SUFFIX;
use super::{HashAlgorithm, Resource, ResourceMetadata, ResourceVersion, SourcePlatform};
use crate::error::TaskError;
use crate::instance::MetadataStore;
use crate::net::download::{download_to_path, is_abort};
use crate::tasks::{BoxFuture, Task, TaskContext};
use reqwest::Client;
use std::path::PathBuf;

/// Replaces one installed resource with a provider version.
///
/// Built during the update check and only run if the caller picks it. The
/// old file is removed once the new one is in place.
pub struct ResourceDownloadTask {
    client: Client,
    platform: SourcePlatform,
    project_name: String,
    slug: String,
    resource: Resource,
    resources_dir: PathBuf,
    store: MetadataStore,
    version: ResourceVersion,
}

impl ResourceDownloadTask {
    pub fn new(
        client: Client,
        platform: SourcePlatform,
        resource: Resource,
        resources_dir: PathBuf,
        version: ResourceVersion,
    ) -> Self {
        Self {
            client,
            platform,
            project_name: resource.name.clone(),
            slug: resource.slug(),
            store: MetadataStore::new(&resources_dir),
            resource,
            resources_dir,
            version,
        }
    }

    pub fn version(&self) -> &ResourceVersion {
        &self.version
    }

    pub fn resource(&self) -> &Resource {
        &self.resource
    }

    /// Where the new file lands; a disabled resource stays disabled.
    pub fn target_path(&self) -> PathBuf {
        let mut name = self.version.file_name.clone();
        if !self.resource.enabled {
            name.push_str(DISABLED_SUFFIX);
        }
        self.resources_dir.join(name)
    }

    fn updated_metadata(&self) -> ResourceMetadata {
        let old = self.resource.metadata.as_ref();
        ResourceMetadata {
            name: self.project_name.clone(),
            slug: self.slug.clone(),
            file_name: self.version.file_name.clone(),
            provider: self.platform,
            project_id: if self.version.project_id.is_empty() {
                old.map(|m| m.project_id.clone()).unwrap_or_default()
            } else {
                self.version.project_id.clone()
            },
            file_id: self.version.id.clone(),
            hash: self.version.hash.clone(),
            hash_format: HashAlgorithm::Sha1,
            version_number: self.version.version_number.clone(),
            release_type: self.version.release_type,
            loaders: self.version.loader_types(),
            mc_versions: self.version.game_versions.clone(),
        }
    }
}

impl Task for ResourceDownloadTask {
    fn name(&self) -> String {
        format!("Installing {} ({})", self.project_name, self.version.version_number)
    }

    fn run<'a>(&'a self, ctx: TaskContext) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(async move {
            if !self.version.is_downloadable() {
                return Err(TaskError::failed(
                    "Download URL is empty. This resource may not be available for direct download.",
                ));
            }

            let target = self.target_path();
            log::info!(
                "Starting download of '{}' from URL: '{}'",
                self.project_name,
                self.version.download_url
            );
            ctx.set_status(format!("Downloading {}", self.version.file_name));

            let expected = Some(self.version.hash.as_str()).filter(|h| !h.is_empty());
            if let Err(e) =
                download_to_path(&self.client, &self.version.download_url, &target, expected, &ctx)
                    .await
            {
                if is_abort(&e) {
                    return Err(TaskError::Aborted);
                }
                return Err(e.into());
            }

            let old = &self.resource.path;
            if self.resource.is_installed() && *old != target && target.exists() {
                if let Err(e) = tokio::fs::remove_file(old).await {
                    if e.kind() != std::io::ErrorKind::NotFound {
                        ctx.warn(format!("Could not remove old file {:?}: {}", old, e));
                    }
                }
            }

            self.store.write(&self.updated_metadata())?;
            log::info!("Installed {} {}", self.project_name, self.version.version_number);
            Ok(())
        })
    }
}
