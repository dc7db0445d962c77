pub mod config;
pub mod error;
pub mod load;
pub mod merge;
pub mod validate;

pub use config::{Config, FeatureConfig, ListenConfig, LogConfig, LogLevel, SessionConfig};
pub use error::ConfigError;
pub use load::{load_config, load_default, load_from_str};
