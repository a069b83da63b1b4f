pub mod loader;
pub mod schema;

pub use {
    loader::{apply_env_overrides, config_dir, data_dir, discover_and_load, load_config},
    schema::{
        CacheConfig, OAuthSettings, PollConfig, RetryConfig, RoomsConfig, ServerConfig,
        StorageConfig, SynadminConfig,
    },
};
