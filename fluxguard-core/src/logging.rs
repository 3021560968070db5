use crate::config::Environment;
use crate::error::{ApplicationError, ApplicationResult};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!("Invalid log level: {}", s)),
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}

/// 日志格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// 紧凑格式（默认）
    Compact,
    /// 完整格式
    Full,
    /// JSON 格式，适合采集到日志平台
    Json,
    /// 美化格式（适合开发）
    Pretty,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "full" => Ok(LogFormat::Full),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            _ => Err(format!("Invalid log format: {}", s)),
        }
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogFormat::Compact => "compact",
            LogFormat::Full => "full",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        };
        f.write_str(s)
    }
}

/// 日志配置
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: LogLevel,
    pub format: LogFormat,
    /// 是否显示目标（模块路径）
    pub show_target: bool,
    pub show_thread_ids: bool,
    /// 自定义过滤器，例如 "fluxguard_web=debug,tower_http=warn"
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            show_target: false,
            show_thread_ids: false,
            filter: None,
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn show_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// 从进程环境变量读取：`RUST_LOG`、`LOG_LEVEL`、`LOG_FORMAT`
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            config.filter = Some(rust_log);
        }
        if let Some(level) = std::env::var("LOG_LEVEL").ok().and_then(|s| s.parse().ok()) {
            config.level = level;
        }
        if let Some(format) = std::env::var("LOG_FORMAT").ok().and_then(|s| s.parse().ok()) {
            config.format = format;
        }

        config
    }

    /// 从 Environment 读取 `logging.*` 配置，未配置的项沿用 [`LoggingConfig::from_env`]
    pub fn from_environment(env: &Environment) -> Self {
        let mut config = Self::from_env();

        if let Some(level) = env.get_parsed::<LogLevel>(crate::constants::LOGGING_LEVEL) {
            config.level = level;
        }
        if let Some(format) = env.get_parsed::<LogFormat>(crate::constants::LOGGING_FORMAT) {
            config.format = format;
        }
        if let Some(filter) = env.get_string(crate::constants::LOGGING_FILTER) {
            config.filter = Some(filter);
        }
        if let Some(show) = env.get_bool(crate::constants::LOGGING_SHOW_TARGET) {
            config.show_target = show;
        }

        config
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string());
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }

    /// 安装全局 subscriber
    ///
    /// 重复初始化返回 [`ApplicationError::LoggingInitFailed`]
    pub fn init(self) -> ApplicationResult<()> {
        let filter = self.env_filter();
        let builder = fmt()
            .with_env_filter(filter)
            .with_target(self.show_target)
            .with_thread_ids(self.show_thread_ids);

        let result = match self.format {
            LogFormat::Compact => builder.compact().try_init(),
            LogFormat::Full => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
            LogFormat::Pretty => builder.pretty().try_init(),
        };

        result.map_err(|e| ApplicationError::LoggingInitFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapPropertySource;

    #[test]
    fn test_log_level_from_str() {
        assert_eq!("info".parse::<LogLevel>().unwrap(), LogLevel::Info);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_format_from_str() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_logging_config_from_environment() {
        let env = Environment::new();
        env.add_property_source(Box::new(
            MapPropertySource::new("test")
                .with_str("logging.level", "debug")
                .with_str("logging.format", "json")
                .with_str("logging.filter", "fluxguard_web=trace")
                .with_str("logging.show-target", "true"),
        ));

        let config = LoggingConfig::from_environment(&env);
        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.filter.as_deref(), Some("fluxguard_web=trace"));
        assert!(config.show_target);
    }

    #[test]
    fn test_logging_config_builder() {
        let config = LoggingConfig::new()
            .level(LogLevel::Error)
            .format(LogFormat::Full)
            .show_target(true);

        assert_eq!(config.level, LogLevel::Error);
        assert_eq!(config.format, LogFormat::Full);
        assert!(config.show_target);
        assert!(config.filter.is_none());
    }
}
