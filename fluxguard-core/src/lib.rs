// fluxguard-core: 启动期装配
//
// 提供 Web 错误处理栈所需的基础设施：
// - 多配置源叠加的 Environment
// - 按名称 / 类型查找、支持父子作用域的 Bean 注册表
// - 启动期一次性求值的条件注册
// - 插件与应用启动流程

pub mod app;
pub mod condition;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod logging;
pub mod plugin;

pub use app::{FluxguardApplication, RunningApplication};
pub use condition::{
    Condition, ConditionOutcome, ConditionalBean, OnMissingBean, OnProperty, OnWebApplication,
    RegistrationState,
};
pub use config::{
    ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
    TomlPropertySource,
};
pub use context::{ApplicationContext, ApplicationContextBuilder, SearchStrategy, WebApplicationType};
pub use error::{ApplicationError, ApplicationResult, RegistryError, Result};
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use plugin::{load_plugins, ApplicationPlugin, PluginRegistry, PluginSubmission};

// 供 submit_plugin! 宏与下游插件使用
pub use async_trait;
pub use inventory;

/// Prelude 模块
pub mod prelude {
    pub use crate::app::{FluxguardApplication, RunningApplication};
    pub use crate::condition::{
        Condition, ConditionalBean, OnMissingBean, OnProperty, OnWebApplication, RegistrationState,
    };
    pub use crate::config::{ConfigValue, Environment, MapPropertySource, PropertySource};
    pub use crate::context::{ApplicationContext, SearchStrategy, WebApplicationType};
    pub use crate::error::{ApplicationError, ApplicationResult};
    pub use crate::logging::{LogFormat, LogLevel, LoggingConfig};
    pub use crate::plugin::{ApplicationPlugin, PluginRegistry};
}
