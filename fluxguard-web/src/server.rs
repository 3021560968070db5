//! Web 服务器模块
//!
//! 基于 Axum 的 Web 服务器实现，错误统一交给容器中激活的
//! [`ErrorWebExceptionHandler`] 处理。

use axum::{
    http::{Method, Uri},
    middleware as axum_middleware, Router,
};
use fluxguard_core::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::constants::*;
use crate::failure::Failure;
use crate::middleware;
use crate::responder::ErrorWebExceptionHandler;

/// 何时在错误属性中包含诊断堆栈
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncludeStacktrace {
    #[default]
    Never,
    Always,
    /// 请求带有 `trace` 查询参数时
    OnParam,
}

impl FromStr for IncludeStacktrace {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "never" | "false" => Ok(IncludeStacktrace::Never),
            "always" | "true" => Ok(IncludeStacktrace::Always),
            "on-param" | "on_param" => Ok(IncludeStacktrace::OnParam),
            other => Err(format!("Invalid include-stacktrace value: {}", other)),
        }
    }
}

impl fmt::Display for IncludeStacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IncludeStacktrace::Never => "never",
            IncludeStacktrace::Always => "always",
            IncludeStacktrace::OnParam => "on-param",
        };
        f.write_str(s)
    }
}

/// 错误处理配置（`server.error.*`）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorProperties {
    /// 错误页路径，直接访问时渲染一个没有具体原因的 500
    pub path: String,

    /// 是否包含 `exception` 属性
    pub include_exception: bool,

    /// 何时包含 `trace` 属性
    pub include_stacktrace: IncludeStacktrace,

    /// 是否包含错误消息，关闭时统一为 "No message available"
    pub include_message: bool,

    /// 是否安装默认错误页
    pub whitelabel_enabled: bool,
}

impl Default for ErrorProperties {
    fn default() -> Self {
        Self {
            path: "/error".to_string(),
            include_exception: false,
            include_stacktrace: IncludeStacktrace::Never,
            include_message: true,
            whitelabel_enabled: true,
        }
    }
}

impl ErrorProperties {
    pub fn from_environment(env: &Environment) -> Self {
        let defaults = Self::default();
        Self {
            path: env.get_string_or(SERVER_ERROR_PATH, &defaults.path),
            include_exception: env.get_bool_or(SERVER_ERROR_INCLUDE_EXCEPTION, defaults.include_exception),
            include_stacktrace: env
                .get_parsed(SERVER_ERROR_INCLUDE_STACKTRACE)
                .unwrap_or(defaults.include_stacktrace),
            include_message: env.get_bool_or(SERVER_ERROR_INCLUDE_MESSAGE, defaults.include_message),
            whitelabel_enabled: env.get_bool_or(SERVER_ERROR_WHITELABEL_ENABLED, defaults.whitelabel_enabled),
        }
    }
}

/// Web 服务器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerProperties {
    /// 服务器监听地址
    pub host: String,

    /// 服务器监听端口
    pub port: u16,

    /// 是否启用 CORS
    pub enable_cors: bool,

    /// 是否启用请求日志
    pub enable_request_logging: bool,

    /// 错误处理配置
    pub error: ErrorProperties,
}

impl Default for ServerProperties {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            enable_cors: false,
            enable_request_logging: true,
            error: ErrorProperties::default(),
        }
    }
}

impl ServerProperties {
    /// 从 Environment 加载配置
    pub fn from_environment(env: &Environment) -> Self {
        Self {
            host: env.get_string_or(SERVER_HOST, "0.0.0.0"),
            port: env.get_parsed(SERVER_PORT).unwrap_or(8080),
            enable_cors: env.get_bool_or(SERVER_ENABLE_CORS, false),
            enable_request_logging: env.get_bool_or(SERVER_ENABLE_REQUEST_LOGGING, true),
            error: ErrorProperties::from_environment(env),
        }
    }

    /// 获取服务器地址
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// 已注册时取容器中的实例，否则从 Environment 读取
    pub fn resolve(context: &ApplicationContext) -> Self {
        context
            .get_bean_by_type::<ServerProperties>()
            .unwrap_or_else(|_| Self::from_environment(context.environment()))
    }
}

/// Fluxguard Web 服务器
pub struct FluxguardWebServer {
    config: ServerProperties,
    handler: Option<Arc<dyn ErrorWebExceptionHandler>>,
    router: Option<Router>,
}

impl FluxguardWebServer {
    /// 从容器读取配置和激活的错误处理器
    pub fn new(context: &Arc<ApplicationContext>) -> ApplicationResult<Self> {
        let config = ServerProperties::resolve(context);

        let handler = match context.get_bean_by_type::<Arc<dyn ErrorWebExceptionHandler>>() {
            Ok(handler) => Some(handler),
            Err(_) if context.web_application_type() != WebApplicationType::Reactive => None,
            Err(e) => {
                return Err(ApplicationError::Server(format!(
                    "No error handler available in reactive mode: {}",
                    e
                )))
            }
        };

        if let Some(handler) = &handler {
            tracing::debug!(handler = handler.name(), "Using error handler");
        }

        Ok(Self {
            config,
            handler,
            router: None,
        })
    }

    /// 设置路由
    pub fn with_router(mut self, router: Router) -> Self {
        self.router = Some(router);
        self
    }

    pub fn properties(&self) -> &ServerProperties {
        &self.config
    }

    /// 组装最终的路由：404 兜底、错误处理、请求 ID、请求日志、CORS
    pub fn build_router(&self) -> Router {
        let error_path = self.config.error.path.clone();
        let mut router = self
            .router
            .clone()
            .unwrap_or_default()
            .fallback(move |method: Method, uri: Uri| std::future::ready(unmatched(&error_path, method, uri)));

        if let Some(handler) = &self.handler {
            router = router.layer(axum_middleware::from_fn_with_state(
                Arc::clone(handler),
                middleware::error_handling,
            ));
        }

        router = router.layer(axum_middleware::from_fn(middleware::request_id));

        if self.config.enable_request_logging {
            router = router.layer(axum_middleware::from_fn(middleware::request_logging));
        }

        if self.config.enable_cors {
            router = router.layer(CorsLayer::permissive());
        }

        router
    }

    /// 绑定监听地址
    pub async fn bind(&self) -> ApplicationResult<TcpListener> {
        let addr = self.config.address();
        tracing::info!("Starting Fluxguard web server on {}", addr);

        TcpListener::bind(&addr)
            .await
            .map_err(|e| ApplicationError::Server(format!("Failed to bind to {}: {}", addr, e)))
    }

    /// 在已绑定的监听器上处理请求
    pub async fn serve(self, listener: TcpListener) -> ApplicationResult<()> {
        let app = self.build_router();

        if let Ok(addr) = listener.local_addr() {
            tracing::info!("Server listening on http://{}", addr);
        }

        axum::serve(listener, app)
            .await
            .map_err(|e| ApplicationError::Server(format!("Server error: {}", e)))?;

        Ok(())
    }

    /// 启动服务器
    pub async fn run(self) -> ApplicationResult<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }
}

/// 没有匹配的路由：错误页路径本身是 500，其余为 404
fn unmatched(error_path: &str, method: Method, uri: Uri) -> Failure {
    let path = uri.path().to_string();
    let failure = if path == error_path {
        Failure::internal("No error available")
    } else {
        Failure::not_found(format!("No route for {} {}", method, path))
    };
    failure.with_request(method, path)
}
