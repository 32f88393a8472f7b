pub mod version;

pub use version::{compare_versions, VersionString};
