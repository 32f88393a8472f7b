//! Phase B: per-provider checks for newer compatible versions.

use super::{ReleaseType, ResourceDownloadTask, ResourceVersion, SourcePlatform, SourceRegistry};
use crate::instance::UpdateConstraints;
use crate::utils::compare_versions;
use parking_lot::Mutex;
use reqwest::Client;
use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::Arc;

pub mod flame;
pub mod modrinth;

pub use flame::FlameCheckUpdate;
pub use modrinth::ModrinthCheckUpdate;

pub const NO_VERSION_REASON: &str = "No valid version found for this resource. It's probably unavailable for the current game version / mod loader.";
pub const NO_VERSION_REASON_GAME_ONLY: &str =
    "No valid version found for this resource. It's probably unavailable for the current game version.";
pub const NOT_DOWNLOADABLE_REASON: &str =
    "Resource has a new update available, but is not downloadable using CurseForge.";

/// A resource with a newer version available, plus the task that installs it.
pub struct Updatable {
    pub name: String,
    pub old_hash: String,
    pub old_version: String,
    pub new_version: String,
    pub release_type: ReleaseType,
    pub changelog: Option<String>,
    pub provider: SourcePlatform,
    /// Pre-selected unless the resource is disabled.
    pub enabled: bool,
    pub download: Arc<ResourceDownloadTask>,
}

impl std::fmt::Debug for Updatable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Updatable")
            .field("name", &self.name)
            .field("old_version", &self.old_version)
            .field("new_version", &self.new_version)
            .field("provider", &self.provider)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFailure {
    pub name: String,
    pub reason: String,
    /// Where the user can fetch the file by hand.
    pub recovery_url: Option<String>,
}

impl CheckFailure {
    pub fn new(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            reason: reason.into(),
            recovery_url: None,
        }
    }

    pub fn with_recovery_url(mut self, url: impl Into<String>) -> Self {
        self.recovery_url = Some(url.into());
        self
    }
}

/// Output shared by every provider check of one run.
#[derive(Debug, Default)]
pub struct CheckResults {
    pub updates: Vec<Updatable>,
    pub failures: Vec<CheckFailure>,
}

/// Everything a provider check needs besides its resources.
#[derive(Clone)]
pub struct CheckEnv {
    pub client: Client,
    pub registry: Arc<SourceRegistry>,
    pub constraints: UpdateConstraints,
    pub resources_dir: PathBuf,
    pub concurrency: usize,
    pub results: Arc<Mutex<CheckResults>>,
}

impl CheckEnv {
    fn push_update(&self, update: Updatable) {
        log::info!(
            "{}: {} -> {} ({})",
            update.name,
            update.old_version,
            update.new_version,
            update.provider
        );
        self.results.lock().updates.push(update);
    }

    fn push_failure(&self, failure: CheckFailure) {
        log::debug!("Update check failed for {}: {}", failure.name, failure.reason);
        self.results.lock().failures.push(failure);
    }

    fn no_version_reason(&self) -> &'static str {
        if self.constraints.loaders.is_empty() {
            NO_VERSION_REASON_GAME_ONLY
        } else {
            NO_VERSION_REASON
        }
    }
}

/// Whether a version satisfies the hard constraints.
///
/// An unknown instance game version does not constrain. A version published
/// without game version tags never matches a known one; missing loader tags
/// are tolerated.
pub fn is_compatible(version: &ResourceVersion, constraints: &UpdateConstraints) -> bool {
    let game_ok = constraints.game_versions.is_empty()
        || version
            .game_versions
            .iter()
            .any(|v| constraints.game_versions.contains(v));
    let loader_ok = constraints.loaders.is_empty()
        || version.loaders.is_empty()
        || version
            .loader_types()
            .iter()
            .any(|l| constraints.loaders.contains(l));
    game_ok && loader_ok
}

/// Newest first; equal publish times fall back to the version label.
pub fn by_recency(a: &ResourceVersion, b: &ResourceVersion) -> Ordering {
    b.date_published
        .cmp(&a.date_published)
        .then_with(|| compare_versions(&b.version_number, &a.version_number))
}

/// The most recently published compatible version.
///
/// Recency is the only ranking; release type does not matter.
pub fn latest_compatible<'a>(
    versions: &'a [ResourceVersion],
    constraints: &UpdateConstraints,
) -> Option<&'a ResourceVersion> {
    versions
        .iter()
        .filter(|v| is_compatible(v, constraints))
        .min_by(|a, b| by_recency(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modplatform::ModloaderType;
    use chrono::{TimeZone, Utc};

    fn version(id: &str, label: &str, day: u32, games: &[&str], loaders: &[&str]) -> ResourceVersion {
        ResourceVersion {
            id: id.into(),
            project_id: "p".into(),
            version_number: label.into(),
            game_versions: games.iter().map(|s| s.to_string()).collect(),
            loaders: loaders.iter().map(|s| s.to_string()).collect(),
            download_url: format!("https://cdn.example/{}.jar", id),
            file_name: format!("{}.jar", id),
            release_type: ReleaseType::Release,
            hash: id.into(),
            date_published: Utc.with_ymd_and_hms(2024, 1, day, 0, 0, 0).single(),
            changelog: None,
        }
    }

    fn fabric_1201() -> UpdateConstraints {
        UpdateConstraints {
            game_versions: vec!["1.20.1".into()],
            loaders: vec![ModloaderType::Fabric],
        }
    }

    #[test]
    fn test_recency_beats_release_type() {
        let mut beta = version("b", "2.0-beta", 10, &["1.20.1"], &["fabric"]);
        beta.release_type = ReleaseType::Beta;
        let versions = vec![version("a", "1.9", 5, &["1.20.1"], &["fabric"]), beta];
        assert_eq!(latest_compatible(&versions, &fabric_1201()).unwrap().id, "b");
    }

    #[test]
    fn test_hard_constraints_filter() {
        let versions = vec![
            version("forge", "3.0", 20, &["1.20.1"], &["forge"]),
            version("newer-game", "2.5", 15, &["1.20.4"], &["fabric"]),
            version("ok", "2.0", 10, &["1.20.1"], &["fabric", "quilt"]),
        ];
        assert_eq!(latest_compatible(&versions, &fabric_1201()).unwrap().id, "ok");
        assert!(latest_compatible(&versions[..2], &fabric_1201()).is_none());
    }

    #[test]
    fn test_untagged_loaders_pass() {
        let versions = vec![version("pack", "1.0", 1, &["1.20.1"], &[])];
        assert!(latest_compatible(&versions, &fabric_1201()).is_some());
    }

    #[test]
    fn test_untagged_game_version_loses_to_older_match() {
        let versions = vec![
            version("new", "2.0", 20, &[], &["fabric"]),
            version("old", "1.0", 10, &["1.20.1"], &["fabric"]),
        ];
        assert_eq!(latest_compatible(&versions, &fabric_1201()).unwrap().id, "old");
        assert!(latest_compatible(&versions[..1], &fabric_1201()).is_none());

        let unknown_game = UpdateConstraints {
            game_versions: Vec::new(),
            loaders: vec![ModloaderType::Fabric],
        };
        assert_eq!(latest_compatible(&versions, &unknown_game).unwrap().id, "new");
    }

    #[test]
    fn test_same_day_uses_version_label() {
        let versions = vec![
            version("x", "1.0.9", 3, &[], &[]),
            version("y", "1.0.10", 3, &[], &[]),
        ];
        assert_eq!(
            latest_compatible(&versions, &UpdateConstraints::default()).unwrap().id,
            "y"
        );
    }
}
