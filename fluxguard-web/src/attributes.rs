//! 错误属性
//!
//! 从 [`Failure`] 推导出有序的「属性名 -> 值」映射，
//! 之后无论渲染为 JSON、纯文本还是 HTML 视图，都以它为唯一数据来源。

use axum::http::StatusCode;
use serde_json::{Map, Value};

use crate::error::RenderError;
use crate::failure::{is_error_status, Failure};
use crate::request::RequestContext;

pub const TIMESTAMP: &str = "timestamp";
pub const PATH: &str = "path";
pub const STATUS: &str = "status";
pub const ERROR: &str = "error";
pub const MESSAGE: &str = "message";
pub const REQUEST_ID: &str = "requestId";
pub const EXCEPTION: &str = "exception";
pub const TRACE: &str = "trace";

const NO_MESSAGE: &str = "No message available";

/// 有序的错误属性
///
/// 不变量：始终包含 400..=599 之间的数值型 `status` 与字符串型 `message`。
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorAttributes {
    map: Map<String, Value>,
}

impl ErrorAttributes {
    /// 只含 `status` 与 `message` 的最小属性集，非错误状态码按 500 处理
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        let status = if is_error_status(status) {
            status
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        let mut map = Map::new();
        map.insert(STATUS.to_string(), Value::from(status.as_u16()));
        map.insert(MESSAGE.to_string(), Value::from(message.into()));
        Self { map }
    }

    /// 从已有映射构造，校验不变量
    pub fn from_map(map: Map<String, Value>) -> Result<Self, RenderError> {
        if !map.get(STATUS).is_some_and(valid_status) {
            return Err(RenderError::Attributes(
                "attribute 'status' must be a number between 400 and 599".to_string(),
            ));
        }
        if !matches!(map.get(MESSAGE), Some(Value::String(_))) {
            return Err(RenderError::Attributes(
                "attribute 'message' must be a string".to_string(),
            ));
        }
        Ok(Self { map })
    }

    /// 状态码；构造时已校验，这里的 500 只是兜底
    pub fn status(&self) -> StatusCode {
        self.map
            .get(STATUS)
            .and_then(Value::as_u64)
            .and_then(|s| u16::try_from(s).ok())
            .and_then(|s| StatusCode::from_u16(s).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    pub fn message(&self) -> &str {
        self.map
            .get(MESSAGE)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.map.get(key)
    }

    /// 插入或替换属性，`status` / `message` 的类型不允许被改坏
    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Result<(), RenderError> {
        let key = key.into();
        let valid = match key.as_str() {
            STATUS => valid_status(&value),
            MESSAGE => value.is_string(),
            _ => true,
        };
        if !valid {
            return Err(RenderError::Attributes(format!(
                "attribute '{}' has an invalid type",
                key
            )));
        }
        self.map.insert(key, value);
        Ok(())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.map
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.map.iter()
    }

    /// 去掉 `timestamp` 的副本，用于比较两次推导的结果
    pub fn without_timestamp(&self) -> Self {
        let mut map = self.map.clone();
        map.remove(TIMESTAMP);
        Self { map }
    }

    pub fn to_json_value(&self) -> Value {
        Value::Object(self.map.clone())
    }
}

fn valid_status(value: &Value) -> bool {
    value.as_u64().is_some_and(|s| (400..=599).contains(&s))
}

/// 推导错误属性时的选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorAttributeOptions {
    pub include_stacktrace: bool,
    pub include_exception: bool,
    pub include_message: bool,
}

impl Default for ErrorAttributeOptions {
    fn default() -> Self {
        Self {
            include_stacktrace: false,
            include_exception: false,
            include_message: true,
        }
    }
}

/// 错误属性提取器
pub trait ErrorAttributesExtractor: Send + Sync {
    fn error_attributes(
        &self,
        failure: &Failure,
        request: &RequestContext,
        options: &ErrorAttributeOptions,
    ) -> Result<ErrorAttributes, RenderError>;
}

/// 默认提取器
///
/// 属性顺序：`timestamp`、`path`、`status`、`error`、`message`、`requestId`，
/// 之后按选项追加 `exception` 与 `trace`。
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultErrorAttributes {
    include_exception: bool,
}

impl DefaultErrorAttributes {
    /// `include_exception` 为 true 时，无论选项如何都输出 `exception`
    pub fn new(include_exception: bool) -> Self {
        Self { include_exception }
    }
}

impl ErrorAttributesExtractor for DefaultErrorAttributes {
    fn error_attributes(
        &self,
        failure: &Failure,
        request: &RequestContext,
        options: &ErrorAttributeOptions,
    ) -> Result<ErrorAttributes, RenderError> {
        let status = failure.status();
        let path = failure
            .request()
            .map(|info| info.path.as_str())
            .unwrap_or(request.path.as_str());
        let message = if options.include_message && !failure.message().is_empty() {
            failure.message()
        } else {
            NO_MESSAGE
        };

        let mut map = Map::new();
        map.insert(
            TIMESTAMP.to_string(),
            Value::from(chrono::Utc::now().to_rfc3339()),
        );
        map.insert(PATH.to_string(), Value::from(path));
        map.insert(STATUS.to_string(), Value::from(status.as_u16()));
        map.insert(
            ERROR.to_string(),
            Value::from(status.canonical_reason().unwrap_or("Unknown Error")),
        );
        map.insert(MESSAGE.to_string(), Value::from(message));
        if let Some(request_id) = &request.request_id {
            map.insert(REQUEST_ID.to_string(), Value::from(request_id.as_str()));
        }
        if self.include_exception || options.include_exception {
            map.insert(EXCEPTION.to_string(), Value::from(failure.kind().code()));
        }
        if options.include_stacktrace {
            map.insert(TRACE.to_string(), Value::from(failure.trace()));
        }

        ErrorAttributes::from_map(map)
    }
}
