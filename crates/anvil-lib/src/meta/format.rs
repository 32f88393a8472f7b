//! Wire format of the catalog files.
//!
//! Parsing never touches the live object until the whole document decoded:
//! a detached copy is built first and then merged in.

use super::index::Index;
use super::require::{Require, RequireSet};
use super::version::Version;
use super::version_list::VersionList;
use crate::error::MetaError;
use chrono::{DateTime, NaiveDateTime};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetadataVersion {
    Invalid,
    InitialRelease,
}

impl MetadataVersion {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetadataVersion::Invalid => None,
            MetadataVersion::InitialRelease => Some(1),
        }
    }
}

pub fn current_format_version() -> MetadataVersion {
    MetadataVersion::InitialRelease
}

#[derive(Deserialize)]
struct IndexFile {
    packages: Vec<PackageEntry>,
}

#[derive(Deserialize)]
struct PackageEntry {
    uid: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    sha256: Option<String>,
}

#[derive(Deserialize)]
struct VersionListFile {
    uid: String,
    #[serde(default)]
    name: Option<String>,
    versions: Vec<VersionEntry>,
}

#[derive(Deserialize)]
struct VersionFile {
    uid: String,
    #[serde(flatten)]
    common: VersionEntry,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VersionEntry {
    version: String,
    release_time: String,
    #[serde(default, rename = "type")]
    type_name: Option<String>,
    #[serde(default)]
    recommended: Option<bool>,
    #[serde(default)]
    volatile: Option<bool>,
    #[serde(default)]
    requires: Option<Vec<RequireEntry>>,
    #[serde(default)]
    conflicts: Option<Vec<RequireEntry>>,
    #[serde(default)]
    sha256: Option<String>,
}

#[derive(Deserialize)]
struct RequireEntry {
    uid: String,
    #[serde(default)]
    equals: Option<String>,
    #[serde(default)]
    suggests: Option<String>,
}

/// Read `formatVersion`. 0 and 1 are the same format.
pub fn parse_format_version(obj: &Value, required: bool) -> MetadataVersion {
    let Some(raw) = obj.get("formatVersion") else {
        return if required {
            MetadataVersion::Invalid
        } else {
            MetadataVersion::InitialRelease
        };
    };
    match raw.as_i64() {
        Some(0) | Some(1) => MetadataVersion::InitialRelease,
        _ => MetadataVersion::Invalid,
    }
}

pub fn serialize_format_version(obj: &mut Value, version: MetadataVersion) {
    if let (Some(map), Some(v)) = (obj.as_object_mut(), version.as_int()) {
        map.insert("formatVersion".to_string(), Value::from(v));
    }
}

fn check_format(obj: &Value) -> Result<(), MetaError> {
    match parse_format_version(obj, true) {
        MetadataVersion::InitialRelease => Ok(()),
        MetadataVersion::Invalid => Err(MetaError::UnknownFormatVersion),
    }
}

fn decode<T: for<'de> Deserialize<'de>>(value: &Value, context: &str) -> Result<T, MetaError> {
    T::deserialize(value).map_err(|e| MetaError::json(context, e))
}

/// ISO-8601 timestamp to seconds. A missing offset means UTC.
pub fn parse_release_time(raw: &str) -> Result<i64, MetaError> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Ok(t.timestamp());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|t| t.and_utc().timestamp())
        .map_err(|e| MetaError::parse(format!("invalid releaseTime '{}': {}", raw, e)))
}

fn to_require_set(entries: Option<Vec<RequireEntry>>) -> RequireSet {
    entries
        .unwrap_or_default()
        .into_iter()
        .map(|r| Require {
            uid: r.uid,
            equals: r.equals.unwrap_or_default(),
            suggests: r.suggests.unwrap_or_default(),
        })
        .collect()
}

/// Decode a require/conflict array stored under `key`.
///
/// Later entries for the same uid replace earlier ones.
pub fn parse_requires(obj: &Value, key: &str) -> Result<RequireSet, MetaError> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(RequireSet::new()),
        Some(raw) => Ok(to_require_set(Some(decode(raw, key)?))),
    }
}

pub fn serialize_requires(obj: &mut Value, set: &RequireSet, key: &str) {
    if set.is_empty() {
        return;
    }
    let Some(map) = obj.as_object_mut() else {
        return;
    };
    let entries = set
        .iter()
        .map(|r| {
            let mut out = Map::new();
            out.insert("uid".into(), Value::from(r.uid.clone()));
            if !r.equals.is_empty() {
                out.insert("equals".into(), Value::from(r.equals.clone()));
            }
            if !r.suggests.is_empty() {
                out.insert("suggests".into(), Value::from(r.suggests.clone()));
            }
            Value::Object(out)
        })
        .collect();
    map.insert(key.to_string(), Value::Array(entries));
}

fn build_version(uid: &str, entry: VersionEntry) -> Result<Version, MetaError> {
    let version = Version::new(uid, entry.version);
    version.set_time(parse_release_time(&entry.release_time)?);
    version.set_type(entry.type_name.unwrap_or_default());
    version.set_recommended(entry.recommended.unwrap_or(false));
    version.set_volatile(entry.volatile.unwrap_or(false));
    version.set_requires(
        to_require_set(entry.requires),
        to_require_set(entry.conflicts),
    );
    if let Some(sha256) = entry.sha256.filter(|s| !s.is_empty()) {
        version.set_sha256(sha256);
    }
    Ok(version)
}

pub fn parse_index(value: &Value, target: &Index) -> Result<(), MetaError> {
    check_format(value)?;
    let file: IndexFile = decode(value, "index.json")?;
    let lists = file
        .packages
        .into_iter()
        .map(|p| {
            let list = VersionList::new(p.uid);
            list.set_name(p.name.unwrap_or_default());
            list.set_sha256(p.sha256.unwrap_or_default());
            Arc::new(list)
        })
        .collect();
    target.merge(&Index::from_lists(lists));
    Ok(())
}

pub fn parse_version_list(value: &Value, target: &VersionList) -> Result<(), MetaError> {
    check_format(value)?;
    let file: VersionListFile = decode(value, "version list")?;
    let versions = file
        .versions
        .into_iter()
        .map(|entry| {
            let version = build_version(&file.uid, entry)?;
            version.set_provides_recommendations();
            Ok(Arc::new(version))
        })
        .collect::<Result<Vec<_>, MetaError>>()?;

    let detached = VersionList::new(file.uid);
    detached.set_name(file.name.unwrap_or_default());
    detached.set_versions(versions);
    target.merge(&detached);
    Ok(())
}

/// Full version file: list fields plus the descriptor, kept verbatim.
pub fn parse_version(value: &Value, target: &Version) -> Result<(), MetaError> {
    check_format(value)?;
    let file: VersionFile = decode(value, "version")?;
    let detached = build_version(&file.uid, file.common)?;
    detached.set_data(Arc::new(value.clone()));
    target.merge(&detached);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_version_gate() {
        assert_eq!(
            parse_format_version(&json!({"formatVersion": 0}), true),
            MetadataVersion::InitialRelease
        );
        assert_eq!(
            parse_format_version(&json!({"formatVersion": 1}), true),
            MetadataVersion::InitialRelease
        );
        assert_eq!(
            parse_format_version(&json!({"formatVersion": 2}), true),
            MetadataVersion::Invalid
        );
        assert_eq!(
            parse_format_version(&json!({"formatVersion": "1"}), true),
            MetadataVersion::Invalid
        );
        assert_eq!(
            parse_format_version(&json!({"formatVersion": 1.5}), true),
            MetadataVersion::Invalid
        );
        assert_eq!(parse_format_version(&json!({}), true), MetadataVersion::Invalid);
        assert_eq!(
            parse_format_version(&json!({}), false),
            MetadataVersion::InitialRelease
        );
    }

    #[test]
    fn test_unknown_format_is_rejected_untouched() {
        let index = Index::new();
        let err = parse_index(
            &json!({"formatVersion": 3, "packages": [{"uid": "net.minecraft"}]}),
            &index,
        )
        .unwrap_err();
        assert!(matches!(err, MetaError::UnknownFormatVersion));
        assert_eq!(err.to_string(), "Unknown format version!");
        assert!(index.is_empty());
    }

    #[test]
    fn test_requires_missing_uid_fails_whole_parse() {
        let list = VersionList::new("net.fabricmc.fabric-loader");
        let payload = json!({
            "formatVersion": 1,
            "uid": "net.fabricmc.fabric-loader",
            "versions": [
                {"version": "0.14.0", "releaseTime": "2022-06-01T00:00:00+00:00"},
                {"version": "0.15.0", "releaseTime": "2023-12-01T00:00:00+00:00",
                 "requires": [{"equals": "1.20.1"}]}
            ]
        });
        assert!(parse_version_list(&payload, &list).is_err());
        assert_eq!(list.count(), 0);
    }

    #[test]
    fn test_duplicate_requires_last_wins() {
        let set = parse_requires(
            &json!({"requires": [
                {"uid": "net.minecraft", "equals": "1.20.1"},
                {"uid": "net.minecraft", "equals": "1.20.2", "suggests": "x"}
            ]}),
            "requires",
        )
        .unwrap();
        assert_eq!(set.len(), 1);
        let only = set.get("net.minecraft").unwrap();
        assert_eq!(only.equals, "1.20.2");
        assert_eq!(only.suggests, "x");
    }

    #[test]
    fn test_release_time_variants() {
        assert_eq!(parse_release_time("1970-01-01T00:01:40+00:00").unwrap(), 100);
        assert_eq!(parse_release_time("1970-01-01T00:01:40Z").unwrap(), 100);
        assert_eq!(parse_release_time("1970-01-01T00:01:40").unwrap(), 100);
        assert!(parse_release_time("yesterday").is_err());
    }

    #[test]
    fn test_version_file_keeps_descriptor() {
        let version = Version::new("net.minecraft", "1.20.1");
        let payload = json!({
            "formatVersion": 1,
            "uid": "net.minecraft",
            "version": "1.20.1",
            "name": "Minecraft",
            "releaseTime": "2023-06-12T13:25:51+00:00",
            "type": "release",
            "mainClass": "net.minecraft.client.main.Main"
        });
        parse_version(&payload, &version).unwrap();

        assert_eq!(version.name(), "Minecraft");
        assert_eq!(version.type_name(), "release");
        assert_eq!(
            version.data().unwrap()["mainClass"],
            "net.minecraft.client.main.Main"
        );
        assert!(!version.provides_recommendations());
    }

    #[test]
    fn test_serialize_requires_omits_empty_fields() {
        let set: RequireSet = vec![Require::new("net.minecraft").equals("1.20.1")]
            .into_iter()
            .collect();
        let mut obj = json!({});
        serialize_requires(&mut obj, &set, "requires");
        serialize_requires(&mut obj, &RequireSet::new(), "conflicts");
        serialize_format_version(&mut obj, current_format_version());
        assert_eq!(
            obj,
            json!({"formatVersion": 1, "requires": [{"uid": "net.minecraft", "equals": "1.20.1"}]})
        );
    }
}
