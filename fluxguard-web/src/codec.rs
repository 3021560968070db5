//! 错误属性的序列化
//!
//! writer 按注册顺序尝试，第一个能写出协商结果的 writer 胜出。

use bytes::Bytes;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::attributes::ErrorAttributes;
use crate::error::RenderError;
use crate::negotiation::MediaType;

/// 消息 writer
pub trait HttpMessageWriter: Send + Sync {
    fn name(&self) -> &str;

    /// 该 writer 可以生成的媒体类型，第一个为默认类型
    fn media_types(&self) -> Vec<MediaType>;

    fn can_write(&self, media_type: &MediaType) -> bool {
        self.media_types().iter().any(|m| m.includes(media_type))
    }

    fn write(&self, attributes: &ErrorAttributes, media_type: &MediaType) -> Result<Bytes, RenderError>;
}

/// JSON writer，同样接受 `application/*+json`
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMessageWriter {
    pretty: bool,
}

impl JsonMessageWriter {
    pub fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl HttpMessageWriter for JsonMessageWriter {
    fn name(&self) -> &str {
        "json"
    }

    fn media_types(&self) -> Vec<MediaType> {
        vec![
            MediaType::application_json(),
            MediaType::new("application", "*+json"),
        ]
    }

    fn write(&self, attributes: &ErrorAttributes, _media_type: &MediaType) -> Result<Bytes, RenderError> {
        let body = if self.pretty {
            serde_json::to_vec_pretty(attributes.as_map())?
        } else {
            serde_json::to_vec(attributes.as_map())?
        };
        Ok(Bytes::from(body))
    }
}

/// 纯文本 writer，每行一个 `key: value`
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextMessageWriter;

impl HttpMessageWriter for PlainTextMessageWriter {
    fn name(&self) -> &str {
        "plain-text"
    }

    fn media_types(&self) -> Vec<MediaType> {
        vec![MediaType::text_plain()]
    }

    fn write(&self, attributes: &ErrorAttributes, _media_type: &MediaType) -> Result<Bytes, RenderError> {
        let mut out = String::new();
        for (key, value) in attributes.iter() {
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            writeln!(out, "{}: {}", key, rendered).map_err(|e| RenderError::Writer {
                writer: self.name().to_string(),
                message: e.to_string(),
            })?;
        }
        Ok(Bytes::from(out))
    }
}

/// 有序的 writer 列表
#[derive(Clone, Default)]
pub struct CodecConfigurer {
    writers: Vec<Arc<dyn HttpMessageWriter>>,
}

impl std::fmt::Debug for CodecConfigurer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.writers.iter().map(|w| w.name()).collect();
        f.debug_struct("CodecConfigurer").field("writers", &names).finish()
    }
}

impl CodecConfigurer {
    /// 空列表
    pub fn new() -> Self {
        Self::default()
    }

    /// JSON 在前，纯文本在后
    pub fn with_defaults() -> Self {
        Self::new()
            .with_writer(JsonMessageWriter::default())
            .with_writer(PlainTextMessageWriter)
    }

    pub fn with_writer(mut self, writer: impl HttpMessageWriter + 'static) -> Self {
        self.writers.push(Arc::new(writer));
        self
    }

    pub fn register_writer(&mut self, writer: Arc<dyn HttpMessageWriter>) {
        self.writers.push(writer);
    }

    pub fn writers(&self) -> &[Arc<dyn HttpMessageWriter>] {
        &self.writers
    }

    /// 所有 writer 的具体媒体类型（去掉通配类型与重复项）
    pub fn producible_media_types(&self) -> Vec<MediaType> {
        let mut result: Vec<MediaType> = Vec::new();
        for media in self.writers.iter().flat_map(|w| w.media_types()) {
            if media.is_wildcard_type() || media.is_wildcard_subtype() {
                continue;
            }
            if !result.iter().any(|m| m.essence() == media.essence()) {
                result.push(media);
            }
        }
        result
    }
}
