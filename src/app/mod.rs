pub mod config;
pub mod paths;

pub use config::{ApiConfig, AppConfig, ChatDefaults, FallbackSettings};
pub use paths::AppPaths;
