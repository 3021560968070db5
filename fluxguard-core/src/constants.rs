//! 核心配置键与内置 Bean 名称

// ==================== 应用 ====================

/// 执行模式：reactive / servlet / none
pub const MAIN_WEB_APPLICATION_TYPE: &str = "fluxguard.main.web-application-type";

// ==================== 日志 ====================

pub const LOGGING_LEVEL: &str = "logging.level";
pub const LOGGING_FORMAT: &str = "logging.format";
pub const LOGGING_FILTER: &str = "logging.filter";
pub const LOGGING_SHOW_TARGET: &str = "logging.show-target";

// ==================== Bean 名称 ====================

pub const ENVIRONMENT_BEAN_NAME: &str = "environment";
