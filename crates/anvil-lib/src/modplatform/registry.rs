use super::curseforge::CurseForgeSource;
use super::modrinth::ModrinthSource;
use super::{ResourceProject, ResourceSource, SourcePlatform};
use crate::config::LauncherConfig;
use anyhow::{anyhow, Result};
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// The configured providers plus a per-run project cache.
pub struct SourceRegistry {
    sources: HashMap<SourcePlatform, Arc<dyn ResourceSource>>,
    project_cache: Mutex<HashMap<(SourcePlatform, String), ResourceProject>>,
}

impl SourceRegistry {
    pub fn new(sources: Vec<Arc<dyn ResourceSource>>) -> Self {
        Self {
            sources: sources.into_iter().map(|s| (s.platform(), s)).collect(),
            project_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn from_config(config: &LauncherConfig, client: Client) -> Self {
        Self::new(vec![
            Arc::new(ModrinthSource::new(client.clone(), &config.modrinth_api_url)),
            Arc::new(CurseForgeSource::new(
                client,
                &config.curseforge_api_url,
                config.curseforge_api_key.clone(),
            )),
        ])
    }

    pub fn get(&self, platform: SourcePlatform) -> Option<Arc<dyn ResourceSource>> {
        self.sources.get(&platform).cloned()
    }

    pub fn require(&self, platform: SourcePlatform) -> Result<Arc<dyn ResourceSource>> {
        self.get(platform)
            .ok_or_else(|| anyhow!("No source registered for {}", platform))
    }

    /// The fallback provider, when one is registered.
    pub fn other(&self, platform: SourcePlatform) -> Option<SourcePlatform> {
        let other = platform.other();
        self.sources.contains_key(&other).then_some(other)
    }

    pub fn platforms(&self) -> Vec<SourcePlatform> {
        let mut platforms: Vec<_> = self.sources.keys().copied().collect();
        platforms.sort();
        platforms
    }

    pub async fn get_project(&self, platform: SourcePlatform, id: &str) -> Result<ResourceProject> {
        {
            let cache = self.project_cache.lock().await;
            if let Some(project) = cache.get(&(platform, id.to_string())) {
                return Ok(project.clone());
            }
        }

        let project = self.require(platform)?.get_project(id).await?;
        self.project_cache
            .lock()
            .await
            .insert((platform, id.to_string()), project.clone());
        Ok(project)
    }

    /// Batch fetch; everything returned is cached for later single lookups.
    pub async fn get_projects(
        &self,
        platform: SourcePlatform,
        ids: &[String],
    ) -> Result<Vec<ResourceProject>> {
        let projects = self.require(platform)?.get_projects(ids).await?;
        let mut cache = self.project_cache.lock().await;
        for project in &projects {
            cache.insert((platform, project.id.clone()), project.clone());
        }
        Ok(projects)
    }
}
