//! 请求处理失败
//!
//! [`Failure`] 是业务代码与错误处理栈之间的唯一契约：
//! 处理器返回 `Result<T, Failure>`，剩下的（状态码、属性、内容协商、渲染）
//! 都交给当前激活的 [`ErrorWebExceptionHandler`](crate::responder::ErrorWebExceptionHandler)。

use axum::{
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// 失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    NotAcceptable,
    Timeout,
    Conflict,
    PayloadTooLarge,
    UnsupportedMediaType,
    TooManyRequests,
    ServiceUnavailable,
    Internal,
}

impl FailureKind {
    /// 该类别的默认状态码
    pub fn default_status(&self) -> StatusCode {
        match self {
            FailureKind::BadRequest => StatusCode::BAD_REQUEST,
            FailureKind::Unauthorized => StatusCode::UNAUTHORIZED,
            FailureKind::Forbidden => StatusCode::FORBIDDEN,
            FailureKind::NotFound => StatusCode::NOT_FOUND,
            FailureKind::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            FailureKind::NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            FailureKind::Timeout => StatusCode::REQUEST_TIMEOUT,
            FailureKind::Conflict => StatusCode::CONFLICT,
            FailureKind::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            FailureKind::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            FailureKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            FailureKind::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            FailureKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// 按状态码归类，没有对应类别的 4xx 归为 `BadRequest`，其余归为 `Internal`
    pub fn from_status(status: StatusCode) -> FailureKind {
        match status {
            StatusCode::BAD_REQUEST => FailureKind::BadRequest,
            StatusCode::UNAUTHORIZED => FailureKind::Unauthorized,
            StatusCode::FORBIDDEN => FailureKind::Forbidden,
            StatusCode::NOT_FOUND => FailureKind::NotFound,
            StatusCode::METHOD_NOT_ALLOWED => FailureKind::MethodNotAllowed,
            StatusCode::NOT_ACCEPTABLE => FailureKind::NotAcceptable,
            StatusCode::REQUEST_TIMEOUT => FailureKind::Timeout,
            StatusCode::CONFLICT => FailureKind::Conflict,
            StatusCode::PAYLOAD_TOO_LARGE => FailureKind::PayloadTooLarge,
            StatusCode::UNSUPPORTED_MEDIA_TYPE => FailureKind::UnsupportedMediaType,
            StatusCode::TOO_MANY_REQUESTS => FailureKind::TooManyRequests,
            StatusCode::SERVICE_UNAVAILABLE => FailureKind::ServiceUnavailable,
            s if s.is_client_error() => FailureKind::BadRequest,
            _ => FailureKind::Internal,
        }
    }

    /// 稳定的类别代码，出现在 `exception` 属性中
    pub fn code(&self) -> &'static str {
        match self {
            FailureKind::BadRequest => "BAD_REQUEST",
            FailureKind::Unauthorized => "UNAUTHORIZED",
            FailureKind::Forbidden => "FORBIDDEN",
            FailureKind::NotFound => "NOT_FOUND",
            FailureKind::MethodNotAllowed => "METHOD_NOT_ALLOWED",
            FailureKind::NotAcceptable => "NOT_ACCEPTABLE",
            FailureKind::Timeout => "TIMEOUT",
            FailureKind::Conflict => "CONFLICT",
            FailureKind::PayloadTooLarge => "PAYLOAD_TOO_LARGE",
            FailureKind::UnsupportedMediaType => "UNSUPPORTED_MEDIA_TYPE",
            FailureKind::TooManyRequests => "TOO_MANY_REQUESTS",
            FailureKind::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            FailureKind::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// 错误响应只允许 4xx / 5xx
pub fn is_error_status(status: StatusCode) -> bool {
    status.is_client_error() || status.is_server_error()
}

/// 失败发生时的请求信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: Method,
    pub path: String,
}

/// 请求处理失败
#[derive(Debug)]
pub struct Failure {
    kind: FailureKind,
    message: String,
    status: Option<StatusCode>,
    cause: Option<Box<dyn Error + Send + Sync + 'static>>,
    request: Option<RequestInfo>,
    captured: Backtrace,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            cause: None,
            request: None,
            captured: Backtrace::capture(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(FailureKind::BadRequest, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unauthorized, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Forbidden, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(FailureKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Conflict, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }

    /// 由状态码构造，类别按 [`FailureKind::from_status`] 推断
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(FailureKind::from_status(status), message).with_status(status)
    }

    /// 把任意错误包装为内部错误，原错误作为 cause
    pub fn from_error<E>(error: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        Self::new(FailureKind::Internal, error.to_string()).with_cause(error)
    }

    /// 显式状态码，覆盖类别默认值；不是 4xx / 5xx 时不生效
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: Error + Send + Sync + 'static,
    {
        self.cause = Some(Box::new(cause));
        self
    }

    pub fn with_request(mut self, method: Method, path: impl Into<String>) -> Self {
        self.request = Some(RequestInfo {
            method,
            path: path.into(),
        });
        self
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn request(&self) -> Option<&RequestInfo> {
        self.request.as_ref()
    }

    /// 实际响应状态码：合法的显式状态码优先，否则取类别默认值
    pub fn status(&self) -> StatusCode {
        self.status
            .filter(|status| is_error_status(*status))
            .unwrap_or_else(|| self.kind.default_status())
    }

    /// 诊断文本：类别、消息、cause 链，以及捕获到的调用栈（`RUST_BACKTRACE` 开启时）
    pub fn trace(&self) -> String {
        let mut out = format!("{}: {}", self.kind, self.message);
        let mut source = self.source();
        while let Some(err) = source {
            out.push_str("\nCaused by: ");
            out.push_str(&err.to_string());
            source = err.source();
        }
        if self.captured.status() == BacktraceStatus::Captured {
            out.push_str("\n\nStack backtrace:\n");
            out.push_str(&self.captured.to_string());
        }
        out
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl Error for Failure {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn Error + 'static))
    }
}

/// 处理器可以直接返回 `Failure`
///
/// 这里只生成一个占位响应，`Failure` 本身放进响应的 Extension，
/// 由 [`error_handling`](crate::middleware::error_handling) 中间件交给激活的错误处理器重新渲染。
impl IntoResponse for Failure {
    fn into_response(self) -> Response {
        let mut response = self.status().into_response();
        response.extensions_mut().insert(Arc::new(self));
        response
    }
}
