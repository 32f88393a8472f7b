//! Mod hosting providers and the update pipeline built on them.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod check_update;
pub mod curseforge;
pub mod ensure_metadata;
pub mod hashing;
pub mod modrinth;
pub mod pipeline;
pub mod registry;
pub mod resource;
pub mod resource_download;
pub mod source;

pub use check_update::{CheckFailure, Updatable};
pub use ensure_metadata::{ChooserAnswer, EnsureMetadataTask, FixedChooser, ProviderChoice, ProviderChooser};
pub use pipeline::{PipelineReport, UpdatePipeline};
pub use registry::SourceRegistry;
pub use resource::{Resource, ResourceMetadata, ResourceStatus};
pub use resource_download::ResourceDownloadTask;
pub use source::ResourceSource;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum SourcePlatform {
    Modrinth,
    CurseForge,
}

impl SourcePlatform {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourcePlatform::Modrinth => "modrinth",
            SourcePlatform::CurseForge => "curseforge",
        }
    }

    pub fn readable_name(&self) -> &'static str {
        match self {
            SourcePlatform::Modrinth => "Modrinth",
            SourcePlatform::CurseForge => "CurseForge",
        }
    }

    /// The provider tried when this one has no match.
    pub fn other(&self) -> SourcePlatform {
        match self {
            SourcePlatform::Modrinth => SourcePlatform::CurseForge,
            SourcePlatform::CurseForge => SourcePlatform::Modrinth,
        }
    }
}

impl fmt::Display for SourcePlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.readable_name())
    }
}

impl FromStr for SourcePlatform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "modrinth" => Ok(SourcePlatform::Modrinth),
            "curseforge" | "flame" => Ok(SourcePlatform::CurseForge),
            _ => Err(anyhow!("Unknown provider: {}", s)),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ModloaderType {
    NeoForge,
    Forge,
    Quilt,
    Fabric,
}

impl ModloaderType {
    /// Probe order used when an instance's own loaders found nothing.
    pub const ALL: [ModloaderType; 4] = [
        ModloaderType::NeoForge,
        ModloaderType::Forge,
        ModloaderType::Quilt,
        ModloaderType::Fabric,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModloaderType::NeoForge => "neoforge",
            ModloaderType::Forge => "forge",
            ModloaderType::Quilt => "quilt",
            ModloaderType::Fabric => "fabric",
        }
    }

    /// `modLoaderType` as the CurseForge API numbers it.
    pub fn curseforge_id(&self) -> u32 {
        match self {
            ModloaderType::Forge => 1,
            ModloaderType::Fabric => 4,
            ModloaderType::Quilt => 5,
            ModloaderType::NeoForge => 6,
        }
    }

    /// Catalog uid of the loader component.
    pub fn component_uid(&self) -> &'static str {
        match self {
            ModloaderType::NeoForge => "net.neoforged",
            ModloaderType::Forge => "net.minecraftforge",
            ModloaderType::Quilt => "org.quiltmc.quilt-loader",
            ModloaderType::Fabric => "net.fabricmc.fabric-loader",
        }
    }

    pub fn from_component_uid(uid: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|l| l.component_uid() == uid)
    }
}

impl fmt::Display for ModloaderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModloaderType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "neoforge" => Ok(ModloaderType::NeoForge),
            "forge" => Ok(ModloaderType::Forge),
            "quilt" => Ok(ModloaderType::Quilt),
            "fabric" => Ok(ModloaderType::Fabric),
            _ => Err(anyhow!("Unknown modloader type: {}", s)),
        }
    }
}

/// Loader names understood by this crate; anything else is dropped.
pub fn parse_loaders<S: AsRef<str>>(names: &[S]) -> Vec<ModloaderType> {
    let mut out: Vec<ModloaderType> = names
        .iter()
        .filter_map(|n| n.as_ref().parse().ok())
        .collect();
    out.sort();
    out.dedup();
    out
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReleaseType {
    #[default]
    Release,
    Beta,
    Alpha,
}

impl ReleaseType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseType::Release => "release",
            ReleaseType::Beta => "beta",
            ReleaseType::Alpha => "alpha",
        }
    }
}

impl fmt::Display for ReleaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    #[default]
    Mod,
    ResourcePack,
    Shader,
    DataPack,
    Modpack,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha1,
    Murmur2,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ResourceProject {
    pub id: String,
    pub source: SourcePlatform,
    pub resource_type: ResourceType,
    pub name: String,
    pub slug: String,
    pub summary: String,
    pub icon_url: Option<String>,
    pub author: String,
    pub download_count: u64,
    pub web_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct ResourceVersion {
    pub id: String,
    pub project_id: String,
    pub version_number: String,
    pub game_versions: Vec<String>,
    pub loaders: Vec<String>,
    /// Empty when the provider does not allow third-party downloads.
    pub download_url: String,
    pub file_name: String,
    pub release_type: ReleaseType,
    pub hash: String, // SHA1
    pub date_published: Option<DateTime<Utc>>,
    pub changelog: Option<String>,
}

impl ResourceVersion {
    pub fn is_downloadable(&self) -> bool {
        !self.download_url.is_empty()
    }

    pub fn loader_types(&self) -> Vec<ModloaderType> {
        parse_loaders(&self.loaders)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SearchQuery {
    pub text: Option<String>,
    pub resource_type: ResourceType,
    pub game_version: Option<String>,
    pub loader: Option<ModloaderType>,
    pub offset: u32,
    pub limit: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SearchResponse {
    pub hits: Vec<ResourceProject>,
    pub total_hits: u64,
}

/// Filters for a project's version listing. Empty lists mean "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionSearchArgs {
    pub project_id: String,
    pub game_versions: Vec<String>,
    pub loaders: Vec<ModloaderType>,
}
