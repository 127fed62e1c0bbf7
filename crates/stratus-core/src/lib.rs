pub mod config;
pub mod error;
pub mod naming;
pub mod types;

pub use config::ClusterConfig;
pub use error::{ConfigError, ConfigResult};
pub use naming::NodeName;
pub use types::*;
