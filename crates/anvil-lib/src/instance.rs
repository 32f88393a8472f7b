//! What the update pipeline needs to know about one game instance.

use crate::meta::{Index, MetaLoader, GAME_UID};
use crate::modplatform::resource::DISABLED_SUFFIX;
use crate::modplatform::{ModloaderType, Resource, ResourceMetadata, ResourceStatus};
use crate::net::NetMode;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const PACK_PROFILE_FILE: &str = "mmc-pack.json";
pub const METADATA_DIR: &str = ".index";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackComponent {
    pub uid: String,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub cached_version: Option<String>,
}

impl PackComponent {
    pub fn effective_version(&self) -> Option<&str> {
        self.version
            .as_deref()
            .or(self.cached_version.as_deref())
            .filter(|v| !v.is_empty())
    }
}

/// The component stack of an instance.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PackProfile {
    #[serde(default)]
    pub format_version: u32,
    #[serde(default)]
    pub components: Vec<PackComponent>,
}

impl PackProfile {
    pub fn load(instance_dir: &Path) -> Result<Self> {
        let path = instance_dir.join(PACK_PROFILE_FILE);
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        serde_json::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))
    }

    pub fn component(&self, uid: &str) -> Option<&PackComponent> {
        self.components.iter().find(|c| c.uid == uid)
    }

    pub fn game_version(&self) -> Option<&str> {
        self.component(GAME_UID).and_then(|c| c.effective_version())
    }

    /// Loaders present in the stack. Quilt also loads Fabric mods.
    pub fn loaders(&self) -> Vec<ModloaderType> {
        let mut loaders: Vec<ModloaderType> = self
            .components
            .iter()
            .filter_map(|c| ModloaderType::from_component_uid(&c.uid))
            .collect();
        if loaders.contains(&ModloaderType::Quilt) {
            loaders.push(ModloaderType::Fabric);
        }
        loaders.sort();
        loaders.dedup();
        loaders
    }
}

/// Hard constraints a provider version must satisfy. Empty means unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateConstraints {
    pub game_versions: Vec<String>,
    pub loaders: Vec<ModloaderType>,
}

/// Work out the constraints for an instance.
///
/// Without a game component the game version comes from the loader's catalog
/// entry; its list gets at most `wait` to load before we go on without it.
pub async fn resolve_constraints(
    profile: &PackProfile,
    index: &Index,
    loader: &MetaLoader,
    mode: NetMode,
    wait: Duration,
) -> UpdateConstraints {
    let loaders = profile.loaders();
    let mut game_versions = Vec::new();

    if let Some(version) = profile.game_version() {
        game_versions.push(version.to_string());
    } else {
        for component in &profile.components {
            if ModloaderType::from_component_uid(&component.uid).is_none() {
                continue;
            }
            let Some(version) = component.effective_version() else {
                continue;
            };
            let list = index.get(&component.uid);
            if !loader.load_with_timeout(list.as_ref(), mode, wait).await {
                log::warn!("{} is not available, ignoring its game version", component.uid);
                continue;
            }
            if let Some(parent) = list.parent_version(version) {
                log::debug!("{} {} belongs to game version {}", component.uid, version, parent);
                game_versions.push(parent);
                break;
            }
        }
    }

    UpdateConstraints {
        game_versions,
        loaders,
    }
}

/// Per-resource provider metadata kept as `<resources_dir>/.index/<slug>.json`.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    pub fn new(resources_dir: &Path) -> Self {
        Self {
            dir: resources_dir.join(METADATA_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, slug: &str) -> PathBuf {
        self.dir.join(format!("{}.json", slug))
    }

    pub fn read(&self, slug: &str) -> Option<ResourceMetadata> {
        let path = self.path_for(slug);
        let contents = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&contents) {
            Ok(meta) => Some(meta),
            Err(e) => {
                log::warn!("Ignoring unreadable metadata {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn read_all(&self) -> Vec<ResourceMetadata> {
        let Ok(entries) = std::fs::read_dir(&self.dir) else {
            return Vec::new();
        };
        let mut all: Vec<ResourceMetadata> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().is_some_and(|ext| ext == "json"))
            .filter_map(|e| {
                let slug = e.path().file_stem()?.to_string_lossy().into_owned();
                self.read(&slug)
            })
            .collect();
        all.sort_by(|a, b| a.slug.cmp(&b.slug));
        all
    }

    pub fn write(&self, meta: &ResourceMetadata) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create {:?}", self.dir))?;
        let path = self.path_for(&meta.slug);
        let tmp = path.with_extension("json.part");
        std::fs::write(&tmp, serde_json::to_vec_pretty(meta)?)
            .with_context(|| format!("Failed to write {:?}", tmp))?;
        std::fs::rename(&tmp, &path).with_context(|| format!("Failed to move {:?} into place", path))
    }

    pub fn remove(&self, slug: &str) -> Result<()> {
        let path = self.path_for(slug);
        match std::fs::remove_file(&path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => {
                Err(e).with_context(|| format!("Failed to remove {:?}", path))
            }
            _ => Ok(()),
        }
    }
}

fn is_resource_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    let base = lower.strip_suffix(DISABLED_SUFFIX).unwrap_or(&lower);
    base.ends_with(".jar") || base.ends_with(".zip")
}

fn display_name(file_name: &str) -> String {
    let base = file_name.strip_suffix(DISABLED_SUFFIX).unwrap_or(file_name);
    Path::new(base)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| base.to_string())
}

/// List the resources of a directory and pair them with stored metadata.
///
/// Metadata whose file is gone yields a `NotInstalled` entry; files without
/// metadata are `NoMetadata`.
pub fn scan_resources(dir: &Path, store: &MetadataStore) -> Result<Vec<Resource>> {
    let known = store.read_all();
    let mut claimed = HashSet::new();
    let mut resources = Vec::new();

    let entries = std::fs::read_dir(dir).with_context(|| format!("Failed to read {:?}", dir))?;
    for entry in entries.filter_map(|e| e.ok()) {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if file_name.starts_with('.') {
            continue;
        }
        let is_folder = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if !is_folder && !is_resource_file(&file_name) {
            continue;
        }

        let stored_name = file_name.strip_suffix(DISABLED_SUFFIX).unwrap_or(&file_name);
        let metadata = known.iter().find(|m| m.file_name == stored_name).cloned();
        if let Some(meta) = &metadata {
            claimed.insert(meta.slug.clone());
        }

        resources.push(Resource {
            name: metadata
                .as_ref()
                .map(|m| m.name.clone())
                .unwrap_or_else(|| display_name(&file_name)),
            path: entry.path(),
            status: if metadata.is_some() {
                ResourceStatus::Installed
            } else {
                ResourceStatus::NoMetadata
            },
            enabled: !file_name.ends_with(DISABLED_SUFFIX),
            is_folder,
            metadata,
        });
    }

    for meta in known.into_iter().filter(|m| !claimed.contains(&m.slug)) {
        log::debug!("{} is tracked but not installed", meta.name);
        resources.push(Resource {
            name: meta.name.clone(),
            path: dir.join(&meta.file_name),
            status: ResourceStatus::NotInstalled,
            enabled: true,
            is_folder: false,
            metadata: Some(meta),
        });
    }

    resources.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    Ok(resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modplatform::{HashAlgorithm, ReleaseType, SourcePlatform};
    use tempfile::TempDir;

    fn meta(slug: &str, file_name: &str) -> ResourceMetadata {
        ResourceMetadata {
            name: slug.to_uppercase(),
            slug: slug.to_string(),
            file_name: file_name.to_string(),
            provider: SourcePlatform::Modrinth,
            project_id: format!("{}-id", slug),
            file_id: "f1".into(),
            hash: "abc".into(),
            hash_format: HashAlgorithm::Sha1,
            version_number: "1.0".into(),
            release_type: ReleaseType::Release,
            loaders: vec![ModloaderType::Fabric],
            mc_versions: vec!["1.20.1".into()],
        }
    }

    #[test]
    fn test_profile_game_version_and_loaders() {
        let profile: PackProfile = serde_json::from_str(
            r#"{"formatVersion": 1, "components": [
                {"uid": "net.minecraft", "version": "1.20.1"},
                {"uid": "org.quiltmc.quilt-loader", "version": "0.21.0"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(profile.game_version(), Some("1.20.1"));
        assert_eq!(
            profile.loaders(),
            vec![ModloaderType::Quilt, ModloaderType::Fabric]
        );
    }

    #[test]
    fn test_store_round_trip_and_remove() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        assert!(store.read("sodium").is_none());

        let m = meta("sodium", "sodium.jar");
        store.write(&m).unwrap();
        assert_eq!(store.read("sodium"), Some(m));
        assert!(dir.path().join(".index/sodium.json").exists());

        store.remove("sodium").unwrap();
        store.remove("sodium").unwrap();
        assert!(store.read_all().is_empty());
    }

    #[test]
    fn test_scan_classifies_files() {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::new(dir.path());
        std::fs::write(dir.path().join("sodium.jar"), b"a").unwrap();
        std::fs::write(dir.path().join("lithium.jar.disabled"), b"b").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"c").unwrap();
        std::fs::create_dir(dir.path().join("unpacked")).unwrap();
        store.write(&meta("sodium", "sodium.jar")).unwrap();
        store.write(&meta("gone", "gone.jar")).unwrap();

        let resources = scan_resources(dir.path(), &store).unwrap();
        let names: Vec<_> = resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["GONE", "lithium", "SODIUM", "unpacked"]);

        assert_eq!(resources[0].status, ResourceStatus::NotInstalled);
        assert_eq!(resources[1].status, ResourceStatus::NoMetadata);
        assert!(!resources[1].enabled);
        assert_eq!(resources[1].file_name(), "lithium.jar");
        assert_eq!(resources[2].status, ResourceStatus::Installed);
        assert!(resources[3].is_folder);
    }
}
