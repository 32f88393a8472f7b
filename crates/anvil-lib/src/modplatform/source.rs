use super::{
    HashAlgorithm, ResourceProject, ResourceVersion, SearchQuery, SearchResponse, SourcePlatform,
    VersionSearchArgs,
};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

#[async_trait]
pub trait ResourceSource: Send + Sync {
    fn platform(&self) -> SourcePlatform;

    /// Digest used as the key of `get_versions_by_hashes`.
    fn hash_algorithm(&self) -> HashAlgorithm;

    async fn search(&self, query: SearchQuery) -> Result<SearchResponse>;
    async fn get_project(&self, id: &str) -> Result<ResourceProject>;
    async fn get_projects(&self, ids: &[String]) -> Result<Vec<ResourceProject>>;
    async fn get_project_versions(&self, args: &VersionSearchArgs) -> Result<Vec<ResourceVersion>>;

    /// Batched lookup of the exact version each file hash belongs to.
    ///
    /// The map is keyed by the input hash; unknown hashes are simply absent.
    async fn get_versions_by_hashes(
        &self,
        hashes: &[String],
    ) -> Result<HashMap<String, ResourceVersion>>;

    async fn get_changelog(&self, project_id: &str, version_id: &str) -> Result<Option<String>>;
}
