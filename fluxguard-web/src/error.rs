use thiserror::Error;

/// 渲染错误响应过程中产生的错误
///
/// 这些错误不会离开错误处理器：记录日志后降级为固定格式的 500 响应。
#[derive(Error, Debug)]
pub enum RenderError {
    /// 提取错误属性失败
    #[error("Failed to extract error attributes: {0}")]
    Attributes(String),

    /// 序列化失败
    #[error("Failed to serialize error attributes: {0}")]
    Serialization(#[from] serde_json::Error),

    /// 视图渲染失败
    #[error("Failed to render view '{view}': {message}")]
    View { view: String, message: String },

    /// 没有可用的 writer
    #[error("No message writer configured for {0}")]
    NoWriter(String),

    /// writer 自身报告的错误
    #[error("Message writer '{writer}' failed: {message}")]
    Writer { writer: String, message: String },
}

/// 响应通道已关闭（请求已被取消）
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Response channel already closed")]
pub struct ChannelClosed;
