pub mod config;
pub mod error;
pub mod instance;
pub mod meta;
pub mod modplatform;
pub mod net;
pub mod tasks;
pub mod utils;
pub mod version;

pub use config::LauncherConfig;
pub use error::{MetaError, NetError, TaskError};
pub use version::BaseVersion;
