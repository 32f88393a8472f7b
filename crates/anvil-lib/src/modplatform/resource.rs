use super::{HashAlgorithm, ModloaderType, ReleaseType, SourcePlatform};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DISABLED_SUFFIX: &str = ".disabled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Installed,
    /// Tracked in the metadata store but the file is gone.
    NotInstalled,
    NoMetadata,
}

/// Provider-side identity of an installed file, persisted next to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub name: String,
    pub slug: String,
    pub file_name: String,
    pub provider: SourcePlatform,
    pub project_id: String,
    pub file_id: String,
    pub hash: String,
    pub hash_format: HashAlgorithm,
    #[serde(default)]
    pub version_number: String,
    #[serde(default)]
    pub release_type: ReleaseType,
    #[serde(default)]
    pub loaders: Vec<ModloaderType>,
    #[serde(default)]
    pub mc_versions: Vec<String>,
}

/// A file (or folder) in an instance's resource directory.
#[derive(Debug, Clone)]
pub struct Resource {
    pub name: String,
    pub path: PathBuf,
    pub status: ResourceStatus,
    pub enabled: bool,
    pub is_folder: bool,
    pub metadata: Option<ResourceMetadata>,
}

impl Resource {
    /// Stored name without the `.disabled` marker.
    pub fn file_name(&self) -> String {
        let raw = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        match raw.strip_suffix(DISABLED_SUFFIX) {
            Some(stripped) => stripped.to_string(),
            None => raw,
        }
    }

    pub fn slug(&self) -> String {
        match &self.metadata {
            Some(meta) if !meta.slug.is_empty() => meta.slug.clone(),
            _ => slugify(&self.name),
        }
    }

    /// Version label the installed file reports.
    pub fn version(&self) -> &str {
        self.metadata
            .as_ref()
            .map(|m| m.version_number.as_str())
            .unwrap_or_default()
    }

    pub fn provider(&self) -> Option<SourcePlatform> {
        self.metadata.as_ref().map(|m| m.provider)
    }

    pub fn loaders(&self) -> &[ModloaderType] {
        self.metadata
            .as_ref()
            .map(|m| m.loaders.as_slice())
            .unwrap_or_default()
    }

    pub fn is_installed(&self) -> bool {
        self.status != ResourceStatus::NotInstalled
    }
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches('-').to_string()
}
