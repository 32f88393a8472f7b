use super::{CheckEnv, CheckFailure, Updatable};
use crate::error::TaskError;
use crate::instance::UpdateConstraints;
use crate::modplatform::hashing::HashTask;
use crate::modplatform::{
    HashAlgorithm, ModloaderType, Resource, ResourceDownloadTask, ResourceSource, ResourceStatus,
    ResourceVersion, SourcePlatform, VersionSearchArgs,
};
use crate::tasks::{BoxFuture, ConcurrentTask, Task, TaskContext};
use std::sync::Arc;

pub const MODRINTH_NO_VERSION_REASON: &str = "No valid version found for this mod. It's probably unavailable for the current game version / mod loader.";

/// Update check for resources tracked on Modrinth.
///
/// Stored hashes in another format are recomputed as sha1 first. When the
/// instance's loaders turn up nothing, loaders the resource itself declares
/// are tried one at a time.
pub struct ModrinthCheckUpdate {
    env: CheckEnv,
    resources: Vec<Resource>,
}

impl ModrinthCheckUpdate {
    pub fn new(env: CheckEnv, resources: Vec<Resource>) -> Self {
        Self { env, resources }
    }

    /// sha1 of every resource, in input order. `None` for missing files.
    async fn current_hashes(&self, ctx: &TaskContext) -> Result<Vec<Option<String>>, TaskError> {
        let engine = ConcurrentTask::new("MakeModrinthHashesTask", self.env.concurrency);
        let mut hashes = Vec::with_capacity(self.resources.len());
        let mut jobs = Vec::new();
        for (i, resource) in self.resources.iter().enumerate() {
            let meta = resource.metadata.as_ref();
            match meta {
                Some(m) if m.hash_format == HashAlgorithm::Sha1 && !m.hash.is_empty() => {
                    hashes.push(Some(m.hash.clone()));
                }
                _ if resource.is_installed() => {
                    let task = Arc::new(HashTask::new(resource.path.clone(), HashAlgorithm::Sha1));
                    engine.add_task(task.clone());
                    jobs.push((i, task));
                    hashes.push(None);
                }
                _ => hashes.push(meta.map(|m| m.hash.clone())),
            }
        }
        if jobs.is_empty() {
            return Ok(hashes);
        }

        match engine.run(ctx.clone()).await {
            Err(TaskError::Aborted) => return Err(TaskError::Aborted),
            Err(e) => log::warn!("Failed to generate hash: {}", e),
            Ok(()) => {}
        }
        for (i, task) in jobs {
            hashes[i] = task.result();
        }
        Ok(hashes)
    }

    async fn query(
        &self,
        source: &dyn ResourceSource,
        project_id: &str,
        constraints: &UpdateConstraints,
    ) -> anyhow::Result<Option<ResourceVersion>> {
        let args = VersionSearchArgs {
            project_id: project_id.to_string(),
            game_versions: constraints.game_versions.clone(),
            loaders: constraints.loaders.clone(),
        };
        let versions = source.get_project_versions(&args).await?;
        Ok(super::latest_compatible(&versions, constraints).cloned())
    }

    /// Latest version for the instance, then for each extra loader the
    /// resource declares.
    async fn find_latest(
        &self,
        source: &dyn ResourceSource,
        resource: &Resource,
        project_id: &str,
        ctx: &TaskContext,
    ) -> Result<anyhow::Result<Option<ResourceVersion>>, TaskError> {
        let constraints = &self.env.constraints;
        match self.query(source, project_id, constraints).await {
            Ok(Some(found)) => return Ok(Ok(Some(found))),
            Ok(None) => {}
            Err(e) => return Ok(Err(e)),
        }

        for loader in ModloaderType::ALL {
            if constraints.loaders.contains(&loader) || !resource.loaders().contains(&loader) {
                continue;
            }
            ctx.checkpoint().await?;
            log::debug!("Retrying {} with loader {}", resource.name, loader);
            let forced = UpdateConstraints {
                game_versions: constraints.game_versions.clone(),
                loaders: vec![loader],
            };
            match self.query(source, project_id, &forced).await {
                Ok(Some(found)) => return Ok(Ok(Some(found))),
                Ok(None) => {}
                Err(e) => log::warn!("Modrinth query for {} failed: {:#}", resource.name, e),
            }
        }
        Ok(Ok(None))
    }

    async fn check_one(
        &self,
        source: &dyn ResourceSource,
        resource: &Resource,
        hash: Option<&str>,
        ctx: &TaskContext,
    ) -> Result<(), TaskError> {
        let Some(meta) = resource.metadata.as_ref() else {
            return Ok(());
        };

        let latest = match self.find_latest(source, resource, &meta.project_id, ctx).await? {
            Ok(Some(latest)) => latest,
            Ok(None) => {
                self.env
                    .push_failure(CheckFailure::new(&resource.name, MODRINTH_NO_VERSION_REASON));
                return Ok(());
            }
            Err(e) => {
                self.env
                    .push_failure(CheckFailure::new(&resource.name, format!("{:#}", e)));
                return Ok(());
            }
        };

        let installed = resource.status != ResourceStatus::NotInstalled;
        if installed && hash == Some(latest.hash.as_str()) {
            return Ok(());
        }
        if installed && resource.version() == latest.version_number {
            return Ok(());
        }
        if !latest.is_downloadable() {
            log::error!("Modrinth mod without download url! {}", latest.file_name);
            self.env.push_failure(
                CheckFailure::new(&resource.name, "The latest version has no download URL.")
                    .with_recovery_url(format!(
                        "https://modrinth.com/mod/{}/version/{}",
                        meta.slug, latest.id
                    )),
            );
            return Ok(());
        }

        let download = ResourceDownloadTask::new(
            self.env.client.clone(),
            SourcePlatform::Modrinth,
            resource.clone(),
            self.env.resources_dir.clone(),
            latest.clone(),
        );
        self.env.push_update(Updatable {
            name: resource.name.clone(),
            old_hash: hash.unwrap_or_default().to_string(),
            old_version: resource.version().to_string(),
            new_version: latest.version_number.clone(),
            release_type: latest.release_type,
            changelog: latest.changelog.clone(),
            provider: SourcePlatform::Modrinth,
            enabled: resource.enabled,
            download: Arc::new(download),
        });
        Ok(())
    }
}

impl Task for ModrinthCheckUpdate {
    fn name(&self) -> String {
        "Check for updates (Modrinth)".to_string()
    }

    fn weight(&self) -> u64 {
        self.resources.len().max(1) as u64
    }

    fn run<'a>(&'a self, ctx: TaskContext) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(async move {
            ctx.set_status("Preparing mods for Modrinth...");
            let source = self.env.registry.require(SourcePlatform::Modrinth)?;
            let hashes = self.current_hashes(&ctx).await?;

            ctx.set_status("Waiting for the API response from Modrinth...");
            let total = self.resources.len() as u64;
            for (i, (resource, hash)) in self.resources.iter().zip(hashes.iter()).enumerate() {
                ctx.checkpoint().await?;
                ctx.set_progress(i as u64, total);
                ctx.abortable(self.check_one(source.as_ref(), resource, hash.as_deref(), &ctx))
                    .await??;
            }
            ctx.set_progress(total, total);
            Ok(())
        })
    }
}
