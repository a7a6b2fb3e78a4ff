pub mod app_config;
pub mod observability;
pub mod scheduling;

pub use app_config::AppConfig;
pub use observability::ObservabilityConfig;
pub use scheduling::{
    DispatchConfig, LoadBalancerConfig, RegistryConfig, RetryConfig, SchedulerConfig,
};
