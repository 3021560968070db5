//! 配置管理
//!
//! 多个配置源按优先级叠加，统一通过 [`Environment`] 读取。
//! 键使用点号分隔的小写形式，例如 `server.error.include-stacktrace`。

use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// 配置值类型
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<ConfigValue>),
    Object(HashMap<String, ConfigValue>),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// 整数，字符串形式的数字同样接受（环境变量只有字符串）
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(f) => Some(*f),
            ConfigValue::Int(i) => Some(*i as f64),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    /// 以字符串形式呈现标量值，用于 `FromStr` 解析
    fn to_scalar_string(&self) -> Option<String> {
        match self {
            ConfigValue::String(s) => Some(s.clone()),
            ConfigValue::Int(i) => Some(i.to_string()),
            ConfigValue::Float(f) => Some(f.to_string()),
            ConfigValue::Bool(b) => Some(b.to_string()),
            ConfigValue::Array(_) | ConfigValue::Object(_) => None,
        }
    }
}

/// 配置源 trait
pub trait PropertySource: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Option<ConfigValue>;

    fn keys(&self) -> Vec<String>;

    /// 优先级（数字越大优先级越高）
    fn priority(&self) -> i32 {
        0
    }
}

/// Environment - 配置管理器
///
/// 类似 Spring Boot 的 Environment：按优先级从高到低依次查询配置源，
/// 第一个命中的值生效。
pub struct Environment {
    sources: RwLock<Vec<Box<dyn PropertySource>>>,
    active_profiles: RwLock<Vec<String>>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sources: Vec<String> = self
            .sources
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        f.debug_struct("Environment")
            .field("sources", &sources)
            .field("active_profiles", &*self.active_profiles.read())
            .finish()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
            active_profiles: RwLock::new(Vec::new()),
        }
    }

    /// 添加配置源，添加后按优先级降序重排
    pub fn add_property_source(&self, source: Box<dyn PropertySource>) {
        let mut sources = self.sources.write();
        tracing::debug!(
            source = source.name(),
            priority = source.priority(),
            "Adding property source"
        );
        sources.push(source);
        // sort_by 是稳定排序，同优先级保持添加顺序
        sources.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        let sources = self.sources.read();
        for source in sources.iter() {
            if let Some(value) = source.get(key) {
                tracing::trace!("Config '{}' found in source '{}'", key, source.name());
                return Some(value);
            }
        }
        None
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.to_scalar_string())
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_i64_or(&self, key: &str, default: i64) -> i64 {
        self.get_i64(key).unwrap_or(default)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(|v| v.as_f64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    /// 获取字符串数组配置
    ///
    /// 支持 TOML 数组 `key = ["a", "b"]` 和逗号分隔字符串 `key = "a, b"`
    pub fn get_string_array(&self, key: &str) -> Option<Vec<String>> {
        match self.get(key)? {
            ConfigValue::Array(arr) => Some(
                arr.iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect(),
            ),
            ConfigValue::String(s) => Some(
                s.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            ),
            _ => None,
        }
    }

    /// 通过 `FromStr` 解析配置值
    ///
    /// 值存在但无法解析时记录警告并返回 `None`，调用方回退到默认值
    pub fn get_parsed<T>(&self, key: &str) -> Option<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.get_string(key)?;
        match raw.parse::<T>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key = key, value = %raw, error = %e, "Ignoring invalid configuration value");
                None
            }
        }
    }

    pub fn set_active_profiles(&self, profiles: Vec<String>) {
        *self.active_profiles.write() = profiles;
    }

    pub fn active_profiles(&self) -> Vec<String> {
        self.active_profiles.read().clone()
    }

    pub fn accepts_profile(&self, profile: &str) -> bool {
        self.active_profiles.read().iter().any(|p| p == profile)
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

// ========== Property Sources ==========

/// 环境变量配置源
///
/// `server.error.include-stacktrace` 对应 `APP_SERVER_ERROR_INCLUDE_STACKTRACE`
pub struct EnvironmentPropertySource {
    prefix: String,
    priority: i32,
}

impl EnvironmentPropertySource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            priority: 100,
        }
    }

    /// `APP_SERVER_PORT` -> `server.port`
    ///
    /// 下划线同时对应 `.` 和 `-`，反向映射统一还原为 `.`
    fn env_to_key(&self, env_key: &str) -> String {
        env_key
            .strip_prefix(&self.prefix)
            .unwrap_or(env_key)
            .to_lowercase()
            .replace('_', ".")
    }

    /// `server.error.include-stacktrace` -> `APP_SERVER_ERROR_INCLUDE_STACKTRACE`
    fn key_to_env(&self, key: &str) -> String {
        format!(
            "{}{}",
            self.prefix,
            key.replace(['.', '-'], "_").to_uppercase()
        )
    }
}

impl PropertySource for EnvironmentPropertySource {
    fn name(&self) -> &str {
        "systemEnvironment"
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        std::env::var(self.key_to_env(key))
            .ok()
            .map(ConfigValue::String)
    }

    fn keys(&self) -> Vec<String> {
        std::env::vars()
            .filter(|(k, _)| k.starts_with(&self.prefix))
            .map(|(k, _)| self.env_to_key(&k))
            .collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// TOML 文件配置源
pub struct TomlPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl TomlPropertySource {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, String> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {:?}: {}", path, e))?;

        Self::parse(&content, path.to_string_lossy().to_string())
    }

    pub fn parse(content: &str, name: impl Into<String>) -> Result<Self, String> {
        let value: toml::Value =
            toml::from_str(content).map_err(|e| format!("Failed to parse TOML: {}", e))?;

        let mut properties = HashMap::new();
        Self::flatten(&value, String::new(), &mut properties);

        Ok(Self {
            name: name.into(),
            properties,
            priority: 0,
        })
    }

    /// 展平嵌套表：`{ server = { port = 1 } }` -> `server.port = 1`
    fn flatten(value: &toml::Value, prefix: String, out: &mut HashMap<String, ConfigValue>) {
        match value {
            toml::Value::Table(table) => {
                for (key, val) in table {
                    let path = if prefix.is_empty() {
                        key.clone()
                    } else {
                        format!("{}.{}", prefix, key)
                    };
                    Self::flatten(val, path, out);
                }
            }
            other => {
                out.insert(prefix, Self::convert(other));
            }
        }
    }

    fn convert(value: &toml::Value) -> ConfigValue {
        match value {
            toml::Value::String(s) => ConfigValue::String(s.clone()),
            toml::Value::Integer(i) => ConfigValue::Int(*i),
            toml::Value::Float(f) => ConfigValue::Float(*f),
            toml::Value::Boolean(b) => ConfigValue::Bool(*b),
            toml::Value::Array(arr) => ConfigValue::Array(arr.iter().map(Self::convert).collect()),
            toml::Value::Table(table) => ConfigValue::Object(
                table
                    .iter()
                    .map(|(k, v)| (k.clone(), Self::convert(v)))
                    .collect(),
            ),
            toml::Value::Datetime(dt) => ConfigValue::String(dt.to_string()),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl PropertySource for TomlPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// 内存配置源（用于测试或运行时覆盖）
pub struct MapPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl MapPropertySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: HashMap::new(),
            priority: 50,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_str(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_property(key, ConfigValue::String(value.into()))
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl PropertySource for MapPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}
