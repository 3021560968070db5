//! 错误视图
//!
//! 客户端偏好 HTML 时，按 `order()` 依次询问视图解析器；
//! 每个解析器依次尝试 `error/{status}`、`error/{series}xx`、`error`。

use axum::http::StatusCode;
use std::fmt::Write as _;
use tera::{escape_html, Tera};

use crate::attributes::{self, ErrorAttributes};
use crate::error::RenderError;

/// 视图解析器
pub trait ViewResolver: Send + Sync {
    fn name(&self) -> &str;

    /// 顺序，数字越小越先尝试
    fn order(&self) -> i32 {
        0
    }

    /// 渲染视图；返回 `None` 表示该解析器没有这个视图
    fn render(&self, view_name: &str, attributes: &ErrorAttributes) -> Option<Result<String, RenderError>>;
}

/// 某个状态码依次尝试的视图名
pub fn error_view_names(status: StatusCode) -> [String; 3] {
    let code = status.as_u16();
    [
        format!("error/{}", code),
        format!("error/{}xx", code / 100),
        "error".to_string(),
    ]
}

/// 基于 Tera 的视图解析器
///
/// 视图 `error/404` 对应模板 `error/404.html`，错误属性作为模板上下文。
pub struct TeraViewResolver {
    tera: Tera,
    order: i32,
}

impl TeraViewResolver {
    pub fn new(tera: Tera) -> Self {
        Self { tera, order: 0 }
    }

    /// 加载目录下的所有 `.html` 模板
    pub fn from_dir(template_dir: &str) -> Result<Self, RenderError> {
        let pattern = format!("{}/**/*.html", template_dir.trim_end_matches('/'));
        let tera = Tera::new(&pattern).map_err(|e| RenderError::View {
            view: pattern.clone(),
            message: describe_tera_error(&e),
        })?;
        tracing::info!(
            templates = tera.get_template_names().count(),
            "Loaded error templates from {}",
            template_dir
        );
        Ok(Self::new(tera))
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    fn template_name(view_name: &str) -> String {
        format!("{}.html", view_name)
    }
}

impl ViewResolver for TeraViewResolver {
    fn name(&self) -> &str {
        "tera"
    }

    fn order(&self) -> i32 {
        self.order
    }

    fn render(&self, view_name: &str, attributes: &ErrorAttributes) -> Option<Result<String, RenderError>> {
        let template = Self::template_name(view_name);
        if !self.tera.get_template_names().any(|name| name == template) {
            return None;
        }

        let rendered = tera::Context::from_serialize(attributes.as_map())
            .and_then(|context| self.tera.render(&template, &context))
            .map_err(|e| RenderError::View {
                view: view_name.to_string(),
                message: describe_tera_error(&e),
            });
        Some(rendered)
    }
}

/// Tera 的错误信息藏在 source 链里
fn describe_tera_error(error: &tera::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(err) = source {
        let _ = write!(message, ": {}", err);
        source = err.source();
    }
    message
}

/// 默认错误页
///
/// 排在所有解析器之后，只提供 `error` 视图。
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitelabelViewResolver;

impl ViewResolver for WhitelabelViewResolver {
    fn name(&self) -> &str {
        "whitelabel"
    }

    fn order(&self) -> i32 {
        i32::MAX
    }

    fn render(&self, view_name: &str, attributes: &ErrorAttributes) -> Option<Result<String, RenderError>> {
        if view_name != "error" {
            return None;
        }

        let field = |key: &str| -> String {
            match attributes.get(key) {
                Some(serde_json::Value::String(s)) => escape_html(s),
                Some(other) => escape_html(&other.to_string()),
                None => String::new(),
            }
        };

        let mut page = String::from("<html><body><h1>Whitelabel Error Page</h1>");
        page.push_str("<p>This application has no configured error view, so you are seeing this as a fallback.</p>");
        let _ = write!(page, "<div id='created'>{}</div>", field(attributes::TIMESTAMP));
        let request_id = attributes
            .get(attributes::REQUEST_ID)
            .map(|_| format!("[{}] ", field(attributes::REQUEST_ID)))
            .unwrap_or_default();
        let _ = write!(
            page,
            "<div>{}There was an unexpected error (type={}, status={}).</div>",
            request_id,
            field(attributes::ERROR),
            attributes.status().as_u16()
        );
        let _ = write!(page, "<div>{}</div>", field(attributes::MESSAGE));
        if attributes.contains(attributes::TRACE) {
            let _ = write!(
                page,
                "<div style='white-space:pre-wrap;'>{}</div>",
                field(attributes::TRACE)
            );
        }
        page.push_str("</body></html>");
        Some(Ok(page))
    }
}
