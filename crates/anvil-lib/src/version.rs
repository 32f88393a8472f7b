//! A version of anything the launcher can list: catalog releases and
//! provider-hosted resource files.

use crate::meta::Version;
use crate::modplatform::ResourceVersion;
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub enum BaseVersion {
    Catalog(Arc<Version>),
    Provider(ResourceVersion),
}

impl BaseVersion {
    /// The identifier that selects this exact version.
    pub fn descriptor(&self) -> &str {
        match self {
            BaseVersion::Catalog(v) => v.descriptor(),
            BaseVersion::Provider(v) => &v.id,
        }
    }

    pub fn name(&self) -> String {
        match self {
            BaseVersion::Catalog(v) => v.version().to_string(),
            BaseVersion::Provider(v) => v.version_number.clone(),
        }
    }

    pub fn type_string(&self) -> String {
        match self {
            BaseVersion::Catalog(v) => v.type_name(),
            BaseVersion::Provider(v) => v.release_type.as_str().to_string(),
        }
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            BaseVersion::Catalog(v) => v.time(),
            BaseVersion::Provider(v) => v.date_published,
        }
    }

    /// Providers have no notion of a recommended file.
    pub fn is_recommended(&self) -> bool {
        match self {
            BaseVersion::Catalog(v) => v.is_recommended(),
            BaseVersion::Provider(_) => false,
        }
    }
}
