pub mod download;
pub mod fetch;
pub mod meta_cache;

pub use download::download_to_path;
pub use fetch::{CachedFetcher, FetchRequest, NetMode, Validator};
pub use meta_cache::{HttpMetaCache, MetaEntry};
