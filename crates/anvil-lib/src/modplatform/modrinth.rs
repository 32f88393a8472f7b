use super::{
    HashAlgorithm, ReleaseType, ResourceProject, ResourceSource, ResourceType, ResourceVersion,
    SearchQuery, SearchResponse, SourcePlatform, VersionSearchArgs,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, Response};
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Deserialize)]
struct ModrinthSearchResult {
    hits: Vec<ModrinthProjectHit>,
    total_hits: u64,
}

#[derive(Deserialize)]
struct ModrinthProjectHit {
    project_id: String,
    slug: String,
    title: String,
    description: String,
    icon_url: Option<String>,
    author: String,
    downloads: u64,
    project_type: String,
}

#[derive(Deserialize)]
struct ModrinthProject {
    id: String,
    slug: String,
    title: String,
    description: String,
    icon_url: Option<String>,
    #[serde(default)]
    downloads: u64,
    project_type: String,
    #[serde(default)]
    team: Option<String>,
}

#[derive(Deserialize)]
struct ModrinthTeamMember {
    user: ModrinthUser,
    role: String,
}

#[derive(Deserialize)]
struct ModrinthUser {
    username: String,
}

#[derive(Deserialize)]
struct ModrinthVersion {
    id: String,
    project_id: String,
    version_number: String,
    #[serde(default)]
    game_versions: Vec<String>,
    #[serde(default)]
    loaders: Vec<String>,
    files: Vec<ModrinthFile>,
    version_type: String,
    date_published: Option<DateTime<Utc>>,
    #[serde(default)]
    changelog: Option<String>,
}

#[derive(Deserialize)]
struct ModrinthFile {
    url: String,
    filename: String,
    hashes: ModrinthHashes,
    #[serde(default)]
    primary: bool,
}

#[derive(Deserialize)]
struct ModrinthHashes {
    #[serde(default)]
    sha1: String,
}

fn resource_type(project_type: &str) -> ResourceType {
    match project_type {
        "resourcepack" => ResourceType::ResourcePack,
        "shader" => ResourceType::Shader,
        "datapack" => ResourceType::DataPack,
        "modpack" => ResourceType::Modpack,
        _ => ResourceType::Mod,
    }
}

fn release_type(version_type: &str) -> ReleaseType {
    match version_type {
        "beta" => ReleaseType::Beta,
        "alpha" => ReleaseType::Alpha,
        _ => ReleaseType::Release,
    }
}

async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(anyhow!("Modrinth API error {} ({}): {}", what, status, body))
}

pub struct ModrinthSource {
    client: Client,
    base_url: String,
}

impl ModrinthSource {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn web_url(project_type: &str, slug: &str) -> String {
        format!("https://modrinth.com/{}/{}", project_type, slug)
    }

    fn map_project(&self, p: ModrinthProject, author: String) -> ResourceProject {
        ResourceProject {
            web_url: Self::web_url(&p.project_type, &p.slug),
            id: p.id,
            source: SourcePlatform::Modrinth,
            resource_type: resource_type(&p.project_type),
            name: p.title,
            slug: p.slug,
            summary: p.description,
            icon_url: p.icon_url,
            author,
            download_count: p.downloads,
        }
    }

    /// Versions can carry several files (signatures, sources); pick the one
    /// meant to be installed.
    fn map_version(v: ModrinthVersion) -> Option<ResourceVersion> {
        let file = v
            .files
            .iter()
            .find(|f| f.primary)
            .or_else(|| {
                v.files.iter().find(|f| {
                    let url = f.url.to_lowercase();
                    (url.ends_with(".jar") || url.ends_with(".zip") || url.ends_with(".mrpack"))
                        && !url.contains("cosign-bundle")
                })
            })
            .or_else(|| v.files.first());
        let Some(file) = file else {
            log::warn!("[Modrinth] Version {} has no files", v.id);
            return None;
        };

        log::debug!(
            "[Modrinth] Selected version file: {} (primary: {}) for version {}",
            file.filename,
            file.primary,
            v.version_number
        );

        Some(ResourceVersion {
            download_url: file.url.clone(),
            file_name: file.filename.clone(),
            hash: file.hashes.sha1.clone(),
            id: v.id,
            project_id: v.project_id,
            version_number: v.version_number,
            game_versions: v.game_versions,
            loaders: v.loaders,
            release_type: release_type(&v.version_type),
            date_published: v.date_published,
            changelog: v.changelog,
        })
    }

    async fn project_author(&self, team: Option<&str>) -> String {
        let Some(team) = team else {
            return "Unknown".to_string();
        };
        let members: Vec<ModrinthTeamMember> =
            match self.client.get(self.url(&format!("team/{}/members", team))).send().await {
                Ok(r) if r.status().is_success() => r.json().await.unwrap_or_default(),
                _ => Vec::new(),
            };
        members
            .iter()
            .find(|m| m.role.eq_ignore_ascii_case("owner"))
            .or_else(|| members.first())
            .map(|m| m.user.username.clone())
            .unwrap_or_else(|| "Unknown".to_string())
    }
}

#[async_trait]
impl ResourceSource for ModrinthSource {
    fn platform(&self) -> SourcePlatform {
        SourcePlatform::Modrinth
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Sha1
    }

    async fn search(&self, query: SearchQuery) -> Result<SearchResponse> {
        let mut facets = Vec::new();
        let mr_type = match query.resource_type {
            ResourceType::Mod => "mod",
            ResourceType::ResourcePack => "resourcepack",
            ResourceType::Shader => "shader",
            ResourceType::DataPack => "datapack",
            ResourceType::Modpack => "modpack",
        };
        facets.push(format!("[\"project_type:{}\"]", mr_type));
        if let Some(version) = &query.game_version {
            facets.push(format!("[\"versions:{}\"]", version));
        }
        if let (Some(loader), ResourceType::Mod) = (query.loader, query.resource_type) {
            if loader == super::ModloaderType::Quilt {
                facets.push("[\"categories:quilt\", \"categories:fabric\"]".to_string());
            } else {
                facets.push(format!("[\"categories:{}\"]", loader));
            }
        }
        let url = format!(
            "{}?query={}&limit={}&offset={}&facets={}",
            self.url("search"),
            urlencoding::encode(query.text.as_deref().unwrap_or("")),
            query.limit,
            query.offset,
            urlencoding::encode(&format!("[{}]", facets.join(",")))
        );

        let response = self.client.get(&url).send().await?;
        let result: ModrinthSearchResult = ensure_success(response, "during search")
            .await?
            .json()
            .await
            .with_context(|| format!("Modrinth search JSON decode error. URL: {}", url))?;

        let hits = result
            .hits
            .into_iter()
            .map(|hit| ResourceProject {
                web_url: Self::web_url(&hit.project_type, &hit.slug),
                id: hit.project_id,
                source: SourcePlatform::Modrinth,
                resource_type: query.resource_type,
                name: hit.title,
                slug: hit.slug,
                summary: hit.description,
                icon_url: hit.icon_url,
                author: hit.author,
                download_count: hit.downloads,
            })
            .collect();

        Ok(SearchResponse {
            hits,
            total_hits: result.total_hits,
        })
    }

    async fn get_project(&self, id: &str) -> Result<ResourceProject> {
        let response = self.client.get(self.url(&format!("project/{}", id))).send().await?;
        let project: ModrinthProject = ensure_success(response, "fetching project")
            .await?
            .json()
            .await
            .with_context(|| format!("Modrinth project JSON decode error. ID: {}", id))?;
        let author = self.project_author(project.team.as_deref()).await;
        Ok(self.map_project(project, author))
    }

    async fn get_projects(&self, ids: &[String]) -> Result<Vec<ResourceProject>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids_json = serde_json::to_string(ids)?;
        let response = self
            .client
            .get(self.url("projects"))
            .query(&[("ids", &ids_json)])
            .send()
            .await?;
        let projects: Vec<ModrinthProject> = ensure_success(response, "fetching projects")
            .await?
            .json()
            .await
            .with_context(|| format!("Modrinth batch projects JSON decode error. IDs: {}", ids_json))?;

        // The batch endpoint does not resolve authors.
        Ok(projects
            .into_iter()
            .map(|p| self.map_project(p, "Unknown".to_string()))
            .collect())
    }

    async fn get_project_versions(&self, args: &VersionSearchArgs) -> Result<Vec<ResourceVersion>> {
        let mut params = Vec::new();
        if !args.game_versions.is_empty() {
            params.push(("game_versions", serde_json::to_string(&args.game_versions)?));
        }
        if !args.loaders.is_empty() {
            let loaders: Vec<&str> = args.loaders.iter().map(|l| l.as_str()).collect();
            params.push(("loaders", serde_json::to_string(&loaders)?));
        }

        let response = self
            .client
            .get(self.url(&format!("project/{}/version", args.project_id)))
            .query(&params)
            .send()
            .await?;
        let versions: Vec<ModrinthVersion> = ensure_success(response, "fetching versions")
            .await?
            .json()
            .await
            .with_context(|| {
                format!("Modrinth versions JSON decode error. Project: {}", args.project_id)
            })?;

        Ok(versions.into_iter().filter_map(Self::map_version).collect())
    }

    async fn get_versions_by_hashes(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, ResourceVersion>> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }
        let body = serde_json::json!({
            "hashes": hashes,
            "algorithm": "sha1",
        });
        let response = self.client.post(self.url("version_files")).json(&body).send().await?;
        let found: HashMap<String, ModrinthVersion> = ensure_success(response, "during hash lookup")
            .await?
            .json()
            .await
            .context("Modrinth hash lookup JSON decode error")?;

        log::debug!("[Modrinth] {} of {} hashes matched", found.len(), hashes.len());
        Ok(found
            .into_iter()
            .filter_map(|(hash, v)| Self::map_version(v).map(|v| (hash, v)))
            .collect())
    }

    async fn get_changelog(&self, _project_id: &str, version_id: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(self.url(&format!("version/{}", version_id)))
            .send()
            .await?;
        let version: ModrinthVersion = ensure_success(response, "fetching version")
            .await?
            .json()
            .await?;
        Ok(version.changelog)
    }
}
