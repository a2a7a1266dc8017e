pub mod loader;
pub mod schema;

pub use loader::{
    apply_env_overrides, load_config, load_config_from_env, load_config_from_str,
    load_config_from_yaml_str,
};
pub use schema::{
    ActionsConfig, Config, DeferralsConfig, LoggingConfig, RetryConfig, SchedulerConfig,
    WorkerConfig,
};
