//! Layered application configuration

mod app_config;

pub use app_config::{
    AppConfig, ExaConfig, HttpConfig, LogFormat, LoggingConfig, MetricsConfig, ProviderEntry,
    ProvidersConfig,
};
