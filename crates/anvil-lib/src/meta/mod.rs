//! The versioned metadata catalog.

pub mod entity;
pub mod events;
pub mod format;
pub mod index;
pub mod require;
pub mod version;
pub mod version_list;

pub use entity::{EntityState, LoadStatus, MetaEntity, MetaLoader, UpdateStatus, META_BASE};
pub use events::{CatalogEvent, EventBus};
pub use index::Index;
pub use require::{Require, RequireSet};
pub use version::{Version, GAME_UID};
pub use version_list::{get_better_version, VersionList};
