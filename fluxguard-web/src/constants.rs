//! Web 配置键与 Bean 名称

// ==================== Server 配置 ====================

pub const SERVER_HOST: &str = "server.host";
pub const SERVER_PORT: &str = "server.port";
pub const SERVER_ENABLE_CORS: &str = "server.enable-cors";
pub const SERVER_ENABLE_REQUEST_LOGGING: &str = "server.enable-request-logging";

// ==================== Error 配置 ====================

/// 错误页路径
pub const SERVER_ERROR_PATH: &str = "server.error.path";

/// 是否在错误属性中包含异常类型
pub const SERVER_ERROR_INCLUDE_EXCEPTION: &str = "server.error.include-exception";

/// 何时包含堆栈：never / always / on-param（也接受 true / false）
pub const SERVER_ERROR_INCLUDE_STACKTRACE: &str = "server.error.include-stacktrace";

/// 是否包含错误消息
pub const SERVER_ERROR_INCLUDE_MESSAGE: &str = "server.error.include-message";

/// 是否启用默认的 whitelabel 错误页
pub const SERVER_ERROR_WHITELABEL_ENABLED: &str = "server.error.whitelabel.enabled";

// ==================== Tera 模板引擎配置 ====================

pub const TERA_ENABLED: &str = "fluxguard.tera.enabled";
pub const TERA_TEMPLATE_DIR: &str = "fluxguard.tera.template-dir";

// ==================== Bean 名称 ====================

pub const SERVER_PROPERTIES_BEAN_NAME: &str = "serverProperties";
pub const ERROR_ATTRIBUTES_BEAN_NAME: &str = "errorAttributes";
pub const ERROR_HANDLER_BEAN_NAME: &str = "errorWebExceptionHandler";
pub const CODEC_CONFIGURER_BEAN_NAME: &str = "serverCodecConfigurer";
pub const TERA_VIEW_RESOLVER_BEAN_NAME: &str = "teraViewResolver";
pub const ROUTER_BEAN_NAME: &str = "router";

/// 请求 ID 头
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// `include-stacktrace = on-param` 时读取的查询参数
pub const TRACE_PARAM: &str = "trace";
