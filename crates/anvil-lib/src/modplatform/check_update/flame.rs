use super::{CheckEnv, CheckFailure, Updatable, NOT_DOWNLOADABLE_REASON};
use crate::error::TaskError;
use crate::modplatform::{
    Resource, ResourceDownloadTask, ResourceMetadata, ResourceStatus, ResourceVersion,
    SourcePlatform, VersionSearchArgs,
};
use crate::tasks::{BoxFuture, Task, TaskContext};
use std::sync::Arc;

/// Update check for resources tracked on CurseForge.
///
/// Resources are checked one after another; CurseForge has no batched
/// "latest version" endpoint.
pub struct FlameCheckUpdate {
    env: CheckEnv,
    resources: Vec<Resource>,
}

impl FlameCheckUpdate {
    pub fn new(env: CheckEnv, resources: Vec<Resource>) -> Self {
        Self { env, resources }
    }

    async fn recovery_url(&self, meta: &ResourceMetadata, latest: &ResourceVersion) -> String {
        match self
            .env
            .registry
            .get_project(SourcePlatform::CurseForge, &meta.project_id)
            .await
        {
            Ok(project) if !project.web_url.is_empty() => {
                format!("{}/download/{}", project.web_url, latest.id)
            }
            Ok(_) | Err(_) => format!(
                "https://www.curseforge.com/minecraft/mc-mods/{}/download/{}",
                meta.slug, latest.id
            ),
        }
    }

    async fn check_one(&self, resource: &Resource, ctx: &TaskContext) -> Result<(), TaskError> {
        let Some(meta) = resource.metadata.as_ref() else {
            return Ok(());
        };
        let source = self.env.registry.require(SourcePlatform::CurseForge)?;
        let args = VersionSearchArgs {
            project_id: meta.project_id.clone(),
            game_versions: self.env.constraints.game_versions.clone(),
            loaders: self.env.constraints.loaders.clone(),
        };

        let versions = match source.get_project_versions(&args).await {
            Ok(versions) => versions,
            Err(e) => {
                self.env
                    .push_failure(CheckFailure::new(&resource.name, format!("{:#}", e)));
                return Ok(());
            }
        };
        ctx.checkpoint().await?;

        ctx.set_status(format!(
            "Parsing the API response from CurseForge for '{}'...",
            resource.name
        ));
        let Some(latest) = super::latest_compatible(&versions, &self.env.constraints) else {
            self.env.push_failure(CheckFailure::new(
                &resource.name,
                self.env.no_version_reason(),
            ));
            return Ok(());
        };

        let installed = resource.status != ResourceStatus::NotInstalled;
        if !latest.is_downloadable() {
            // Already on that file: nothing to fetch, nothing to report.
            if latest.id == meta.file_id {
                return Ok(());
            }
            let url = self.recovery_url(meta, latest).await;
            self.env.push_failure(
                CheckFailure::new(&resource.name, NOT_DOWNLOADABLE_REASON).with_recovery_url(url),
            );
            return Ok(());
        }
        if latest.hash.is_empty() || (installed && latest.hash == meta.hash) {
            return Ok(());
        }

        let old_version = if !meta.version_number.is_empty() {
            meta.version_number.clone()
        } else if installed {
            "Unknown".to_string()
        } else {
            "Not installed".to_string()
        };
        let changelog = match source.get_changelog(&meta.project_id, &latest.id).await {
            Ok(changelog) => changelog,
            Err(e) => {
                log::warn!("No changelog for {} {}: {:#}", resource.name, latest.id, e);
                None
            }
        };

        let download = ResourceDownloadTask::new(
            self.env.client.clone(),
            SourcePlatform::CurseForge,
            resource.clone(),
            self.env.resources_dir.clone(),
            latest.clone(),
        );
        self.env.push_update(Updatable {
            name: resource.name.clone(),
            old_hash: meta.hash.clone(),
            old_version,
            new_version: latest.version_number.clone(),
            release_type: latest.release_type,
            changelog,
            provider: SourcePlatform::CurseForge,
            enabled: resource.enabled,
            download: Arc::new(download),
        });
        Ok(())
    }
}

impl Task for FlameCheckUpdate {
    fn name(&self) -> String {
        "Check for updates (CurseForge)".to_string()
    }

    fn weight(&self) -> u64 {
        self.resources.len().max(1) as u64
    }

    fn run<'a>(&'a self, ctx: TaskContext) -> BoxFuture<'a, Result<(), TaskError>> {
        Box::pin(async move {
            ctx.set_status("Preparing resources for CurseForge...");
            let total = self.resources.len() as u64;
            for (i, resource) in self.resources.iter().enumerate() {
                ctx.checkpoint().await?;
                ctx.set_status(format!(
                    "Getting API response from CurseForge for '{}'...",
                    resource.name
                ));
                ctx.set_progress(i as u64, total);
                ctx.abortable(self.check_one(resource, &ctx)).await??;
            }
            ctx.set_progress(total, total);
            Ok(())
        })
    }
}
