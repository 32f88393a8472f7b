use super::hashing::{sha1_file, HashTask};
use super::{
    HashAlgorithm, Resource, ResourceMetadata, ResourceProject, ResourceStatus, ResourceVersion,
    SourcePlatform, SourceRegistry,
};
use crate::error::TaskError;
use crate::instance::MetadataStore;
use crate::tasks::{BoxFuture, ConcurrentTask, Task, TaskContext};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderChoice {
    Use {
        provider: SourcePlatform,
        /// Retry once on the other provider when this one has no match.
        try_others: bool,
    },
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChooserAnswer {
    pub choice: ProviderChoice,
    /// Reuse this answer for every remaining resource of the run.
    pub apply_to_all: bool,
}

/// Decides which provider a resource without metadata is looked up on.
pub trait ProviderChooser: Send {
    fn choose(&mut self, resource: &Resource) -> ChooserAnswer;
}

/// Answers the same for everything; the non-interactive chooser.
pub struct FixedChooser(pub ProviderChoice);

impl ProviderChooser for FixedChooser {
    fn choose(&mut self, _resource: &Resource) -> ChooserAnswer {
        ChooserAnswer {
            choice: self.0,
            apply_to_all: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct EnsureResults {
    pub ready: Vec<Resource>,
    pub failed: Vec<(Resource, String)>,
}

/// Finds provider metadata for a batch of resources on one provider.
///
/// Files are hashed, looked up in one batched request and matched projects
/// are fetched for their names. Every matched resource gets its metadata
/// written to the store right away.
pub struct EnsureMetadataTask {
    platform: SourcePlatform,
    registry: Arc<SourceRegistry>,
    store: MetadataStore,
    concurrency: usize,
    resources: Mutex<Vec<Resource>>,
    results: Mutex<EnsureResults>,
}

impl EnsureMetadataTask {
    pub fn new(
        platform: SourcePlatform,
        registry: Arc<SourceRegistry>,
        store: MetadataStore,
        resources: Vec<Resource>,
        concurrency: usize,
    ) -> Self {
        Self {
            platform,
            registry,
            store,
            concurrency,
            resources: Mutex::new(resources),
            results: Mutex::new(EnsureResults::default()),
        }
    }

    pub fn platform(&self) -> SourcePlatform {
        self.platform
    }

    pub fn take_results(&self) -> EnsureResults {
        std::mem::take(&mut *self.results.lock())
    }

    fn ready(&self, resource: Resource) {
        log::debug!("Generated metadata for {}", resource.name);
        self.results.lock().ready.push(resource);
    }

    fn fail(&self, resource: Resource, reason: impl Into<String>) {
        let reason = reason.into();
        log::debug!("Failed to generate metadata for {}: {}", resource.name, reason);
        self.results.lock().failed.push((resource, reason));
    }

    async fn hash_all(
        &self,
        pending: Vec<Resource>,
        algorithm: HashAlgorithm,
        ctx: &TaskContext,
    ) -> Result<HashMap<String, Resource>, TaskError> {
        let engine = ConcurrentTask::new("MakeHashesTask", self.concurrency);
        let mut jobs = Vec::with_capacity(pending.len());
        for resource in pending {
            let task = Arc::new(HashTask::new(resource.path.clone(), algorithm));
            engine.add_task(task.clone());
            jobs.push((resource, task));
        }

        match engine.run(ctx.clone()).await {
            Err(TaskError::Aborted) => return Err(TaskError::Aborted),
            Err(e) => log::warn!("Some hashes could not be generated: {}", e),
            Ok(()) => {}
        }

        let mut by_hash = HashMap::new();
        for (resource, task) in jobs {
            match task.result() {
                Some(hash) => {
                    by_hash.insert(hash, resource);
                }
                None => self.fail(resource, "Failed to generate hash"),
            }
        }
        Ok(by_hash)
    }

    fn build_metadata(
        &self,
        resource: &Resource,
        hash: &str,
        algorithm: HashAlgorithm,
        version: &ResourceVersion,
        project: Option<&ResourceProject>,
    ) -> anyhow::Result<ResourceMetadata> {
        let sha1 = if !version.hash.is_empty() {
            version.hash.clone()
        } else if algorithm == HashAlgorithm::Sha1 {
            hash.to_string()
        } else {
            sha1_file(&resource.path)?
        };
        let slug = project
            .map(|p| p.slug.clone())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| resource.slug());

        Ok(ResourceMetadata {
            name: project
                .map(|p| p.name.clone())
                .unwrap_or_else(|| resource.name.clone()),
            slug,
            file_name: resource.file_name(),
            provider: self.platform,
            project_id: version.project_id.clone(),
            file_id: version.id.clone(),
            hash: sha1,
            hash_format: HashAlgorithm::Sha1,
            version_number: version.version_number.clone(),
            release_type: version.release_type,
            loaders: version.loader_types(),
            mc_versions: version.game_versions.clone(),
        })
    }

    async fn execute(&self, ctx: TaskContext) -> Result<(), TaskError> {
        ctx.checkpoint().await?;
        let source = self.registry.require(self.platform)?;
        let algorithm = source.hash_algorithm();
        let resources = std::mem::take(&mut *self.resources.lock());

        let mut pending = Vec::new();
        for resource in resources {
            if resource.status != ResourceStatus::NoMetadata
                && resource.provider() == Some(self.platform)
            {
                log::debug!("{} already has metadata!", resource.name);
                self.ready(resource);
            } else if resource.is_folder {
                self.ready(resource);
            } else if !resource.is_installed() {
                self.fail(resource, "File is not installed");
            } else {
                pending.push(resource);
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        ctx.set_status(format!(
            "Requesting metadata information from {}...",
            self.platform
        ));
        let mut by_hash = self.hash_all(pending, algorithm, &ctx).await?;
        ctx.checkpoint().await?;

        let hashes: Vec<String> = by_hash.keys().cloned().collect();
        let versions = match ctx.abortable(source.get_versions_by_hashes(&hashes)).await? {
            Ok(versions) => versions,
            Err(e) => {
                let reason = format!("{} lookup failed: {:#}", self.platform, e);
                for (_, resource) in by_hash.drain() {
                    self.fail(resource, reason.clone());
                }
                return Ok(());
            }
        };
        ctx.checkpoint().await?;

        let mut project_ids: Vec<String> = versions.values().map(|v| v.project_id.clone()).collect();
        project_ids.sort();
        project_ids.dedup();
        let projects: HashMap<String, ResourceProject> =
            match ctx
                .abortable(self.registry.get_projects(self.platform, &project_ids))
                .await?
            {
                Ok(projects) => projects.into_iter().map(|p| (p.id.clone(), p)).collect(),
                Err(e) => {
                    log::warn!("Could not fetch project details from {}: {:#}", self.platform, e);
                    HashMap::new()
                }
            };

        for (hash, version) in versions {
            let Some(mut resource) = by_hash.remove(&hash) else {
                log::warn!("Invalid hash from the API response: {}", hash);
                continue;
            };
            let project = projects.get(&version.project_id);
            let written = self
                .build_metadata(&resource, &hash, algorithm, &version, project)
                .and_then(|meta| self.store.write(&meta).map(|_| meta));
            match written {
                Ok(meta) => {
                    resource.name = meta.name.clone();
                    resource.metadata = Some(meta);
                    resource.status = ResourceStatus::Installed;
                    self.ready(resource);
                }
                Err(e) => self.fail(resource, format!("{:#}", e)),
            }
        }

        for (_, resource) in by_hash {
            self.fail(resource, format!("No match found on {}", self.platform));
        }
        Ok(())
    }
}

impl Task for EnsureMetadataTask {
    fn name(&self) -> String {
        format!("Ensure metadata ({})", self.platform)
    }

    fn run<'a>(&'a self, ctx: TaskContext) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(self.execute(ctx))
    }
}
