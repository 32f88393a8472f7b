use super::{
    HashAlgorithm, ReleaseType, ResourceProject, ResourceSource, ResourceType, ResourceVersion,
    SearchQuery, SearchResponse, SourcePlatform, VersionSearchArgs,
};
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use std::collections::HashMap;

const MINECRAFT_GAME_ID: u32 = 432;
const PAGE_SIZE: usize = 50;
const MAX_PAGES: usize = 20;

#[derive(Deserialize)]
struct CFSearchResult {
    data: Vec<CFMod>,
    pagination: CFPagination,
}

#[derive(Deserialize)]
struct CFModResponse {
    data: CFMod,
}

#[derive(Deserialize)]
struct CFModsResponse {
    data: Vec<CFMod>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CFMod {
    id: u32,
    name: String,
    #[serde(default)]
    slug: String,
    #[serde(default)]
    summary: String,
    links: CFLinks,
    logo: Option<CFLogo>,
    #[serde(default)]
    authors: Vec<CFAuthor>,
    #[serde(default)]
    download_count: f64,
    class_id: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CFLinks {
    #[serde(default)]
    website_url: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CFLogo {
    thumbnail_url: String,
}

#[derive(Deserialize)]
struct CFAuthor {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CFPagination {
    total_count: u32,
}

#[derive(Deserialize)]
struct CFFilesResponse {
    data: Vec<CFFile>,
    pagination: CFPagination,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CFFile {
    id: u32,
    mod_id: u32,
    display_name: String,
    file_name: String,
    release_type: u8,
    #[serde(default)]
    game_versions: Vec<String>,
    #[serde(default)]
    hashes: Vec<CFHash>,
    file_date: Option<DateTime<Utc>>,
    download_url: Option<String>,
    #[serde(default)]
    file_fingerprint: u64,
}

#[derive(Deserialize)]
struct CFHash {
    value: String,
    algo: u8, // 1 = Sha1, 2 = Md5
}

#[derive(Deserialize)]
struct CFStringResponse {
    data: String,
}

#[derive(Deserialize)]
struct CFFingerprintResponse {
    data: CFFingerprintData,
}

#[derive(Deserialize)]
struct CFFingerprintData {
    #[serde(rename = "exactMatches", default)]
    exact_matches: Vec<CFExactMatch>,
}

#[derive(Deserialize)]
struct CFExactMatch {
    file: CFFile,
}

async fn ensure_success(response: Response, what: &str) -> Result<Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    Err(anyhow!("CurseForge API error {} ({}): {}", what, status, body))
}

pub struct CurseForgeSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl CurseForgeSource {
    pub fn new(client: Client, base_url: &str, api_key: Option<String>) -> Self {
        if api_key.is_none() {
            log::warn!("CurseForgeSource initializing without an API key");
        }
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn request(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header(reqwest::header::ACCEPT, "application/json");
        match &self.api_key {
            Some(key) => builder.header("x-api-key", key),
            None => builder,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.request(self.client.get(format!("{}/{}", self.base_url, path)))
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.request(self.client.post(format!("{}/{}", self.base_url, path)))
    }

    fn map_class_id_to_type(class_id: u32) -> ResourceType {
        match class_id {
            12 => ResourceType::ResourcePack,
            6552 => ResourceType::Shader,
            17 => ResourceType::DataPack,
            4471 => ResourceType::Modpack,
            _ => ResourceType::Mod,
        }
    }

    fn map_type_to_class_id(res_type: ResourceType) -> u32 {
        match res_type {
            ResourceType::Mod => 6,
            ResourceType::ResourcePack => 12,
            ResourceType::Shader => 6552,
            ResourceType::DataPack => 17,
            ResourceType::Modpack => 4471,
        }
    }

    fn map_mod(item: CFMod, resource_type: Option<ResourceType>) -> ResourceProject {
        ResourceProject {
            id: item.id.to_string(),
            source: SourcePlatform::CurseForge,
            resource_type: resource_type
                .unwrap_or_else(|| Self::map_class_id_to_type(item.class_id.unwrap_or(6))),
            name: item.name,
            slug: item.slug,
            summary: item.summary,
            icon_url: item.logo.map(|l| l.thumbnail_url),
            author: item
                .authors
                .first()
                .map(|a| a.name.clone())
                .unwrap_or_else(|| "Unknown".to_string()),
            download_count: item.download_count as u64,
            web_url: item.links.website_url,
        }
    }

    /// Loader names ride along in `gameVersions`; split them out.
    fn map_file(file: CFFile) -> ResourceVersion {
        let hash = file
            .hashes
            .iter()
            .find(|h| h.algo == 1)
            .map(|h| h.value.clone())
            .unwrap_or_default();
        let (loaders, game_versions): (Vec<String>, Vec<String>) =
            file.game_versions.into_iter().partition(|v| {
                matches!(
                    v.to_lowercase().as_str(),
                    "forge" | "fabric" | "quilt" | "neoforge"
                )
            });

        ResourceVersion {
            id: file.id.to_string(),
            project_id: file.mod_id.to_string(),
            version_number: file.display_name,
            game_versions,
            loaders: loaders.into_iter().map(|l| l.to_lowercase()).collect(),
            download_url: file.download_url.unwrap_or_default(),
            file_name: file.file_name,
            release_type: match file.release_type {
                2 => ReleaseType::Beta,
                3 => ReleaseType::Alpha,
                _ => ReleaseType::Release,
            },
            hash,
            date_published: file.file_date,
            changelog: None,
        }
    }
}

#[async_trait]
impl ResourceSource for CurseForgeSource {
    fn platform(&self) -> SourcePlatform {
        SourcePlatform::CurseForge
    }

    fn hash_algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Murmur2
    }

    async fn search(&self, query: SearchQuery) -> Result<SearchResponse> {
        let mut url = format!(
            "mods/search?gameId={}&classId={}&index={}&pageSize={}",
            MINECRAFT_GAME_ID,
            Self::map_type_to_class_id(query.resource_type),
            query.offset,
            query.limit
        );
        if let Some(text) = &query.text {
            url.push_str(&format!("&searchFilter={}", urlencoding::encode(text)));
        }
        if let Some(version) = &query.game_version {
            url.push_str(&format!("&gameVersion={}", version));
        }
        if let (Some(loader), ResourceType::Mod) = (query.loader, query.resource_type) {
            url.push_str(&format!("&modLoaderType={}", loader.curseforge_id()));
        }

        let response = self.get(&url).send().await?;
        let result: CFSearchResult = ensure_success(response, "during search")
            .await?
            .json()
            .await
            .with_context(|| format!("CurseForge search JSON decode error. URL: {}", url))?;

        Ok(SearchResponse {
            hits: result
                .data
                .into_iter()
                .map(|item| Self::map_mod(item, Some(query.resource_type)))
                .collect(),
            total_hits: result.pagination.total_count as u64,
        })
    }

    async fn get_project(&self, id: &str) -> Result<ResourceProject> {
        let response = self.get(&format!("mods/{}", id)).send().await?;
        let mod_response: CFModResponse = ensure_success(response, "fetching project")
            .await?
            .json()
            .await
            .with_context(|| format!("CurseForge project JSON decode error. ID: {}", id))?;
        Ok(Self::map_mod(mod_response.data, None))
    }

    async fn get_projects(&self, ids: &[String]) -> Result<Vec<ResourceProject>> {
        let mod_ids: Vec<u32> = ids.iter().filter_map(|id| id.parse::<u32>().ok()).collect();
        if mod_ids.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({ "modIds": mod_ids });
        let response = self.post("mods").json(&body).send().await?;
        let result: CFModsResponse = ensure_success(response, "fetching projects")
            .await?
            .json()
            .await
            .context("CurseForge batch projects JSON decode error")?;
        Ok(result
            .data
            .into_iter()
            .map(|item| Self::map_mod(item, None))
            .collect())
    }

    /// The API filters on one game version and one loader; anything wider is
    /// left to the caller.
    async fn get_project_versions(&self, args: &VersionSearchArgs) -> Result<Vec<ResourceVersion>> {
        let mut filter = String::new();
        if let [game_version] = args.game_versions.as_slice() {
            filter.push_str(&format!("&gameVersion={}", urlencoding::encode(game_version)));
        }
        if let [loader] = args.loaders.as_slice() {
            filter.push_str(&format!("&modLoaderType={}", loader.curseforge_id()));
        }

        let mut files = Vec::new();
        let mut index = 0usize;
        for page in 0..MAX_PAGES {
            let url = format!(
                "mods/{}/files?index={}&pageSize={}{}",
                args.project_id, index, PAGE_SIZE, filter
            );
            let response = self.get(&url).send().await?;
            let result: CFFilesResponse = ensure_success(response, "fetching versions")
                .await?
                .json()
                .await
                .with_context(|| {
                    format!("CurseForge versions JSON decode error. Project: {}", args.project_id)
                })?;

            let count = result.data.len();
            files.extend(result.data);
            if count < PAGE_SIZE || index + count >= result.pagination.total_count as usize {
                break;
            }
            index += PAGE_SIZE;
            if page > 5 {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }

        Ok(files.into_iter().map(Self::map_file).collect())
    }

    async fn get_versions_by_hashes(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, ResourceVersion>> {
        let fingerprints = hashes
            .iter()
            .map(|h| {
                h.parse::<u32>()
                    .map_err(|_| anyhow!("Invalid fingerprint: {}", h))
            })
            .collect::<Result<Vec<_>>>()?;
        if fingerprints.is_empty() {
            return Ok(HashMap::new());
        }

        let body = serde_json::json!({ "fingerprints": fingerprints });
        let response = self.post("fingerprints").json(&body).send().await?;
        let result: CFFingerprintResponse = ensure_success(response, "during fingerprint lookup")
            .await?
            .json()
            .await
            .context("CurseForge fingerprint JSON decode error")?;

        log::debug!(
            "[CurseForge] {} of {} fingerprints matched",
            result.data.exact_matches.len(),
            hashes.len()
        );
        Ok(result
            .data
            .exact_matches
            .into_iter()
            .map(|m| (m.file.file_fingerprint.to_string(), Self::map_file(m.file)))
            .collect())
    }

    async fn get_changelog(&self, project_id: &str, version_id: &str) -> Result<Option<String>> {
        let response = self
            .get(&format!("mods/{}/files/{}/changelog", project_id, version_id))
            .send()
            .await?;
        let result: CFStringResponse = ensure_success(response, "fetching changelog")
            .await?
            .json()
            .await?;
        Ok(Some(result.data).filter(|c| !c.is_empty()))
    }
}
