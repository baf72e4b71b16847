pub mod loader;
pub mod schema;

pub use loader::{
    load_builtin, load_from_path, load_from_str, ConfigError, ConfigOrigin, BUILTIN_CONFIG,
};
pub use schema::{
    FallbackConfig, MarkerConfig, Metadata, PatchConfig, StrategyConfig, TargetConfig,
    ValidationError, ValidationIssue,
};
