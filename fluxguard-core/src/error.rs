//! 统一的错误类型
//!
//! 框架内部使用 `thiserror` 定义的 [`ApplicationError`]，
//! 用户初始化器可以直接使用 `anyhow::Result`。

use thiserror::Error;

pub use anyhow::Result;

/// 应用级结果类型
pub type ApplicationResult<T> = std::result::Result<T, ApplicationError>;

/// Bean 注册表错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("No bean named '{0}' is registered")]
    BeanNotFound(String),

    #[error("A bean named '{0}' is already registered in this context")]
    DuplicateBean(String),

    #[error("Bean '{name}' is not of the expected type {expected}")]
    TypeMismatch { name: String, expected: &'static str },
}

/// 应用错误
#[derive(Error, Debug)]
pub enum ApplicationError {
    /// 配置错误
    #[error("Configuration error: {0}")]
    Config(String),

    /// 日志系统初始化失败
    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),

    /// Bean 注册 / 查找失败
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// 插件执行失败
    #[error("Plugin '{plugin}' failed: {message}")]
    Plugin { plugin: String, message: String },

    /// Web 服务器错误
    #[error("Server error: {0}")]
    Server(String),
}

impl ApplicationError {
    pub fn plugin(plugin: impl Into<String>, message: impl std::fmt::Display) -> Self {
        ApplicationError::Plugin {
            plugin: plugin.into(),
            message: message.to_string(),
        }
    }
}

