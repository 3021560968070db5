//! 错误响应器
//!
//! [`ErrorResponder`] 是默认的 [`ErrorWebExceptionHandler`]：
//! 提取错误属性，与客户端协商表示形式，渲染视图或序列化属性，
//! 最后向响应通道写入且只写入一次。渲染过程中的任何错误都会降级为固定的 500 响应。

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::attributes::{ErrorAttributeOptions, ErrorAttributes, ErrorAttributesExtractor};
use crate::codec::CodecConfigurer;
use crate::constants::TRACE_PARAM;
use crate::error::{ChannelClosed, RenderError};
use crate::failure::Failure;
use crate::negotiation::{AcceptHeaderNegotiator, ContentNegotiator, MediaType};
use crate::request::RequestContext;
use crate::server::{ErrorProperties, IncludeStacktrace};
use crate::view::{error_view_names, ViewResolver};

/// 渲染失败时使用的固定响应体
pub const FALLBACK_BODY: &str =
    r#"{"status":500,"error":"Internal Server Error","message":"Internal Server Error"}"#;

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// 待写出的响应
#[derive(Debug, Clone, PartialEq)]
pub struct ServerResponse {
    pub status: StatusCode,
    pub content_type: String,
    pub body: Bytes,
}

impl ServerResponse {
    pub fn new(status: StatusCode, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            content_type: content_type.into(),
            body: body.into(),
        }
    }

    /// 固定格式的 500 响应
    pub fn fallback() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "application/json",
            Bytes::from_static(FALLBACK_BODY.as_bytes()),
        )
    }

    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }
}

impl IntoResponse for ServerResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        match HeaderValue::from_str(&self.content_type) {
            Ok(value) => {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            Err(_) => {
                tracing::warn!(content_type = %self.content_type, "Dropping invalid Content-Type header");
            }
        }
        response
    }
}

/// 响应通道
///
/// `write` 消耗通道本身，因此每个通道最多写一次。
pub trait ResponseChannel: Send {
    fn write(self: Box<Self>, response: ServerResponse) -> Result<(), ChannelClosed>;
}

impl ResponseChannel for oneshot::Sender<ServerResponse> {
    fn write(self: Box<Self>, response: ServerResponse) -> Result<(), ChannelClosed> {
        (*self).send(response).map_err(|_| ChannelClosed)
    }
}

/// 一次处理的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseOutcome {
    /// 已写出；`fallback` 表示渲染失败后写出的是固定响应
    Written {
        status: StatusCode,
        content_type: String,
        fallback: bool,
    },
    /// 通道已关闭，响应被丢弃
    Discarded { status: StatusCode },
}

impl ResponseOutcome {
    pub fn status(&self) -> StatusCode {
        match self {
            ResponseOutcome::Written { status, .. } | ResponseOutcome::Discarded { status } => *status,
        }
    }
}

/// 错误处理器 trait
///
/// 容器中以 `Arc<dyn ErrorWebExceptionHandler>` 注册；用户注册自己的实现后，
/// 自动配置不会再注册默认的 [`ErrorResponder`]。
#[async_trait]
pub trait ErrorWebExceptionHandler: Send + Sync {
    fn name(&self) -> &str;

    /// 处理失败并向 `channel` 写出响应
    async fn handle(
        &self,
        failure: &Failure,
        request: &RequestContext,
        channel: Box<dyn ResponseChannel>,
    ) -> ResponseOutcome;
}

/// 写出响应；通道已关闭时只记录日志
pub fn deliver(channel: Box<dyn ResponseChannel>, response: ServerResponse, fallback: bool) -> ResponseOutcome {
    let status = response.status;
    let content_type = response.content_type.clone();
    match channel.write(response) {
        Ok(()) => ResponseOutcome::Written {
            status,
            content_type,
            fallback,
        },
        Err(ChannelClosed) => {
            tracing::debug!(status = %status, "Response channel closed, discarding error response");
            ResponseOutcome::Discarded { status }
        }
    }
}

/// 默认错误处理器
///
/// 创建后不再修改，可在并发请求间共享。
pub struct ErrorResponder {
    extractor: Arc<dyn ErrorAttributesExtractor>,
    properties: ErrorProperties,
    resolvers: Vec<Arc<dyn ViewResolver>>,
    codecs: CodecConfigurer,
    negotiator: Arc<dyn ContentNegotiator>,
}

impl ErrorResponder {
    /// 默认 writer、默认协商器、没有视图解析器
    pub fn new(extractor: Arc<dyn ErrorAttributesExtractor>, properties: ErrorProperties) -> Self {
        Self {
            extractor,
            properties,
            resolvers: Vec::new(),
            codecs: CodecConfigurer::with_defaults(),
            negotiator: Arc::new(AcceptHeaderNegotiator),
        }
    }

    /// 添加视图解析器，按 `order()` 保持有序（相同顺序时先添加的在前）
    pub fn with_view_resolver(mut self, resolver: Arc<dyn ViewResolver>) -> Self {
        self.resolvers.push(resolver);
        self.resolvers.sort_by_key(|r| r.order());
        self
    }

    pub fn with_view_resolvers(self, resolvers: impl IntoIterator<Item = Arc<dyn ViewResolver>>) -> Self {
        resolvers
            .into_iter()
            .fold(self, |responder, resolver| responder.with_view_resolver(resolver))
    }

    pub fn with_codecs(mut self, codecs: CodecConfigurer) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn with_negotiator(mut self, negotiator: Arc<dyn ContentNegotiator>) -> Self {
        self.negotiator = negotiator;
        self
    }

    pub fn view_resolvers(&self) -> &[Arc<dyn ViewResolver>] {
        &self.resolvers
    }

    pub fn codecs(&self) -> &CodecConfigurer {
        &self.codecs
    }

    pub fn properties(&self) -> &ErrorProperties {
        &self.properties
    }

    /// 本次请求的属性选项
    pub fn attribute_options(&self, request: &RequestContext) -> ErrorAttributeOptions {
        let include_stacktrace = match self.properties.include_stacktrace {
            IncludeStacktrace::Never => false,
            IncludeStacktrace::Always => true,
            IncludeStacktrace::OnParam => request.query_flag(TRACE_PARAM),
        };
        ErrorAttributeOptions {
            include_stacktrace,
            include_exception: self.properties.include_exception,
            include_message: self.properties.include_message,
        }
    }

    /// 生成响应但不写出；第二个值表示是否使用了固定响应
    pub fn render(&self, failure: &Failure, request: &RequestContext) -> (ServerResponse, bool) {
        match self.try_render(failure, request) {
            Ok(response) => (response, false),
            Err(e) => {
                tracing::error!(
                    path = %request.path,
                    failure = %failure,
                    error = %e,
                    "Failed to render error response, writing fallback body"
                );
                (ServerResponse::fallback(), true)
            }
        }
    }

    fn try_render(&self, failure: &Failure, request: &RequestContext) -> Result<ServerResponse, RenderError> {
        let options = self.attribute_options(request);
        let attributes = self.extractor.error_attributes(failure, request, &options)?;
        let status = attributes.status();

        let mut producible = self.codecs.producible_media_types();
        if !self.resolvers.is_empty() {
            producible.push(MediaType::text_html());
        }
        let negotiated = self.negotiator.negotiate(&request.accept, &producible);

        if negotiated
            .as_ref()
            .is_some_and(|m| m.essence() == MediaType::text_html().essence())
        {
            if let Some(html) = self.render_view(&attributes)? {
                return Ok(ServerResponse::new(status, HTML_CONTENT_TYPE, html));
            }
        }

        self.write_body(&attributes, negotiated.as_ref())
    }

    fn render_view(&self, attributes: &ErrorAttributes) -> Result<Option<String>, RenderError> {
        for view_name in error_view_names(attributes.status()) {
            for resolver in &self.resolvers {
                if let Some(rendered) = resolver.render(&view_name, attributes) {
                    tracing::debug!(resolver = resolver.name(), view = %view_name, "Rendered error view");
                    return rendered.map(Some);
                }
            }
        }
        Ok(None)
    }

    fn write_body(
        &self,
        attributes: &ErrorAttributes,
        negotiated: Option<&MediaType>,
    ) -> Result<ServerResponse, RenderError> {
        let writers = self.codecs.writers();
        let selected = negotiated
            .and_then(|media| {
                writers
                    .iter()
                    .find(|w| w.can_write(media))
                    .map(|w| (w, media.clone()))
            })
            .or_else(|| {
                writers
                    .first()
                    .and_then(|w| w.media_types().into_iter().next().map(|media| (w, media)))
            });

        let Some((writer, media)) = selected else {
            return Err(RenderError::NoWriter(
                negotiated.map_or_else(|| "*/*".to_string(), |m| m.to_string()),
            ));
        };

        let body = writer.write(attributes, &media)?;
        let media = if media.type_() == "text" && media.param("charset").is_none() {
            media.with_charset("utf-8")
        } else {
            media
        };
        Ok(ServerResponse::new(attributes.status(), media.to_string(), body))
    }

    fn log_failure(&self, failure: &Failure, request: &RequestContext) {
        let status = failure.status();
        if status.is_server_error() {
            tracing::error!(
                method = %request.method,
                path = %request.path,
                status = status.as_u16(),
                kind = %failure.kind(),
                trace = %failure.trace(),
                "Request failed"
            );
        } else {
            tracing::debug!(
                method = %request.method,
                path = %request.path,
                status = status.as_u16(),
                kind = %failure.kind(),
                message = %failure.message(),
                "Request failed"
            );
        }
    }
}

#[async_trait]
impl ErrorWebExceptionHandler for ErrorResponder {
    fn name(&self) -> &str {
        "errorResponder"
    }

    async fn handle(
        &self,
        failure: &Failure,
        request: &RequestContext,
        channel: Box<dyn ResponseChannel>,
    ) -> ResponseOutcome {
        self.log_failure(failure, request);
        let (response, fallback) = self.render(failure, request);
        deliver(channel, response, fallback)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attributes::DefaultErrorAttributes;
    use crate::codec::{HttpMessageWriter, JsonMessageWriter};
    use crate::view::{TeraViewResolver, WhitelabelViewResolver};
    use axum::http::Method;
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::fmt;
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// 收集 error 级别事件的字段
    #[derive(Clone, Default)]
    struct ErrorEvents {
        events: Arc<Mutex<Vec<String>>>,
    }

    struct FieldsVisitor(String);

    impl Visit for FieldsVisitor {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            self.0.push_str(&format!("{}={:?} ", field.name(), value));
        }
    }

    impl<S: Subscriber> Layer<S> for ErrorEvents {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::ERROR {
                let mut visitor = FieldsVisitor(String::new());
                event.record(&mut visitor);
                self.events.lock().push(visitor.0);
            }
        }
    }

    struct FailingExtractor;

    impl ErrorAttributesExtractor for FailingExtractor {
        fn error_attributes(
            &self,
            _failure: &Failure,
            _request: &RequestContext,
            _options: &ErrorAttributeOptions,
        ) -> Result<ErrorAttributes, RenderError> {
            Err(RenderError::Attributes("extractor unavailable".to_string()))
        }
    }

    /// 记录写入次数的通道
    #[derive(Clone, Default)]
    struct RecordingChannel {
        writes: Arc<Mutex<Vec<ServerResponse>>>,
    }

    impl ResponseChannel for RecordingChannel {
        fn write(self: Box<Self>, response: ServerResponse) -> Result<(), ChannelClosed> {
            self.writes.lock().push(response);
            Ok(())
        }
    }

    struct BrokenWriter;

    impl HttpMessageWriter for BrokenWriter {
        fn name(&self) -> &str {
            "broken"
        }

        fn media_types(&self) -> Vec<MediaType> {
            vec![MediaType::application_json()]
        }

        fn write(&self, _attributes: &ErrorAttributes, _media_type: &MediaType) -> Result<Bytes, RenderError> {
            Err(RenderError::Writer {
                writer: "broken".to_string(),
                message: "misconfigured".to_string(),
            })
        }
    }

    fn responder() -> ErrorResponder {
        ErrorResponder::new(Arc::new(DefaultErrorAttributes::default()), ErrorProperties::default())
    }

    fn json_request() -> RequestContext {
        RequestContext::new(Method::GET, "/items/9").with_accept("application/json")
    }

    async fn handle(responder: &ErrorResponder, failure: &Failure, request: &RequestContext) -> (ResponseOutcome, Vec<ServerResponse>) {
        let channel = RecordingChannel::default();
        let outcome = responder
            .handle(failure, request, Box::new(channel.clone()))
            .await;
        let writes = channel.writes.lock().clone();
        (outcome, writes)
    }

    fn kinds() -> Vec<Failure> {
        vec![
            Failure::not_found("resource missing"),
            Failure::bad_request("bad input"),
            Failure::internal("boom"),
            Failure::forbidden(""),
            Failure::conflict("taken").with_status(StatusCode::IM_A_TEAPOT),
        ]
    }

    #[tokio::test]
    async fn test_not_found_json_scenario() {
        let (outcome, writes) = handle(&responder(), &Failure::not_found("resource missing"), &json_request()).await;

        assert_eq!(writes.len(), 1);
        let response = &writes[0];
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.content_type, "application/json");
        assert_eq!(
            outcome,
            ResponseOutcome::Written {
                status: StatusCode::NOT_FOUND,
                content_type: "application/json".to_string(),
                fallback: false,
            }
        );

        let body: Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["status"], 404);
        assert_eq!(body["message"], "resource missing");
        assert!(body["timestamp"].is_string());
        assert!(body.get("trace").is_none());
    }

    #[tokio::test]
    async fn test_exactly_one_write_with_valid_status() {
        let responder = responder().with_view_resolver(Arc::new(WhitelabelViewResolver));
        for accept in ["application/json", "text/html", "text/plain", "image/png", "*/*"] {
            let request = RequestContext::new(Method::POST, "/x").with_accept(accept);
            for failure in kinds() {
                let (_, writes) = handle(&responder, &failure, &request).await;
                assert_eq!(writes.len(), 1, "accept={}", accept);
                assert!(!writes[0].body.is_empty());
                assert!((100..600).contains(&writes[0].status.as_u16()));
                assert_eq!(writes[0].status, failure.status());
            }
        }
    }

    #[tokio::test]
    async fn test_no_stack_text_without_include_stacktrace() {
        let responder = responder().with_view_resolver(Arc::new(WhitelabelViewResolver));
        for accept in ["application/json", "text/html", "text/plain"] {
            let request = RequestContext::new(Method::GET, "/x")
                .with_accept(accept)
                .with_query("trace=true");
            for failure in kinds() {
                let (_, writes) = handle(&responder, &failure, &request).await;
                let body = String::from_utf8(writes[0].body.to_vec()).unwrap();
                assert!(!body.contains("Caused by"));
                assert!(!body.contains("Stack backtrace"));
                assert!(!body.contains(&format!("{}: ", failure.kind().code())));
            }
        }
    }

    #[tokio::test]
    async fn test_json_body_round_trips_attributes() {
        let responder = responder();
        let extractor = DefaultErrorAttributes::default();
        let request = json_request();
        for failure in kinds() {
            let derived = extractor
                .error_attributes(&failure, &request, &responder.attribute_options(&request))
                .unwrap();
            let (_, writes) = handle(&responder, &failure, &request).await;
            let body: Value = serde_json::from_slice(&writes[0].body).unwrap();
            assert_eq!(body["status"], derived.get("status").cloned().unwrap());
            assert_eq!(body["message"], derived.get("message").cloned().unwrap());
        }
    }

    #[tokio::test]
    async fn test_broken_writer_falls_back() {
        let responder = responder().with_codecs(CodecConfigurer::new().with_writer(BrokenWriter));
        let (outcome, writes) = handle(&responder, &Failure::not_found("x"), &json_request()).await;

        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0], ServerResponse::fallback());
        assert_eq!(&writes[0].body[..], FALLBACK_BODY.as_bytes());
        assert!(matches!(outcome, ResponseOutcome::Written { fallback: true, .. }));
    }

    #[tokio::test]
    async fn test_failing_extractor_falls_back_and_logs() {
        let events = ErrorEvents::default();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(events.clone()));

        let responder = ErrorResponder::new(Arc::new(FailingExtractor), ErrorProperties::default());
        let (outcome, writes) = handle(&responder, &Failure::not_found("x"), &json_request()).await;

        assert_eq!(writes, vec![ServerResponse::fallback()]);
        assert!(matches!(outcome, ResponseOutcome::Written { fallback: true, .. }));
        let body: Value = serde_json::from_slice(&writes[0].body).unwrap();
        assert_eq!(body["status"], 500);
        assert_eq!(body["message"], "Internal Server Error");

        let events = events.events.lock();
        assert!(events
            .iter()
            .any(|e| e.contains("Failed to render error response") && e.contains("extractor unavailable")));
    }

    #[tokio::test]
    async fn test_broken_template_falls_back_and_logs() {
        let events = ErrorEvents::default();
        let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(events.clone()));

        let mut tera = tera::Tera::default();
        tera.add_raw_template("error/404.html", "{{ undefined_variable }}")
            .unwrap();
        let responder = responder().with_view_resolver(Arc::new(TeraViewResolver::new(tera)));
        let request = RequestContext::new(Method::GET, "/x").with_accept("text/html");
        let (outcome, writes) = handle(&responder, &Failure::not_found("x"), &request).await;

        assert_eq!(writes, vec![ServerResponse::fallback()]);
        assert_eq!(
            outcome,
            ResponseOutcome::Written {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                content_type: "application/json".to_string(),
                fallback: true,
            }
        );

        let events = events.events.lock();
        assert!(events
            .iter()
            .any(|e| e.contains("Failed to render error response") && e.contains("error/404")));
    }

    #[tokio::test]
    async fn test_no_writers_falls_back() {
        let responder = responder().with_codecs(CodecConfigurer::new());
        let (outcome, writes) = handle(&responder, &Failure::bad_request("x"), &json_request()).await;
        assert_eq!(writes.len(), 1);
        assert_eq!(outcome.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_unacceptable_type_uses_first_writer() {
        let request = RequestContext::new(Method::GET, "/x").with_accept("image/png");
        let (_, writes) = handle(&responder(), &Failure::not_found("x"), &request).await;
        assert_eq!(writes[0].content_type, "application/json");
        assert_eq!(writes[0].status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_wildcard_prefers_structured_body() {
        let responder = responder().with_view_resolver(Arc::new(WhitelabelViewResolver));
        let request = RequestContext::new(Method::GET, "/x");
        let (_, writes) = handle(&responder, &Failure::not_found("x"), &request).await;
        assert_eq!(writes[0].content_type, "application/json");
    }

    #[tokio::test]
    async fn test_plain_text_body() {
        let request = RequestContext::new(Method::GET, "/x").with_accept("text/plain");
        let (_, writes) = handle(&responder(), &Failure::not_found("gone"), &request).await;
        assert_eq!(writes[0].content_type, "text/plain; charset=utf-8");
        let body = String::from_utf8(writes[0].body.to_vec()).unwrap();
        assert!(body.contains("message: gone\n"));
    }

    #[tokio::test]
    async fn test_view_resolvers_in_order() {
        let mut tera = tera::Tera::default();
        tera.add_raw_template("error/4xx.html", "client error {{ status }}")
            .unwrap();
        let responder = responder()
            .with_view_resolver(Arc::new(WhitelabelViewResolver))
            .with_view_resolver(Arc::new(TeraViewResolver::new(tera)));
        assert_eq!(responder.view_resolvers()[0].name(), "tera");

        let request = RequestContext::new(Method::GET, "/x").with_accept("text/html");
        let (_, writes) = handle(&responder, &Failure::not_found("x"), &request).await;
        assert_eq!(writes[0].content_type, HTML_CONTENT_TYPE);
        assert_eq!(&writes[0].body[..], b"client error 404");

        let (_, writes) = handle(&responder, &Failure::internal("x"), &request).await;
        assert!(String::from_utf8(writes[0].body.to_vec())
            .unwrap()
            .contains("Whitelabel Error Page"));
    }

    #[tokio::test]
    async fn test_html_without_matching_view_uses_writer() {
        let mut tera = tera::Tera::default();
        tera.add_raw_template("error/404.html", "nf").unwrap();
        let responder = responder().with_view_resolver(Arc::new(TeraViewResolver::new(tera)));

        let request = RequestContext::new(Method::GET, "/x").with_accept("text/html");
        let (_, writes) = handle(&responder, &Failure::conflict("x"), &request).await;
        assert_eq!(writes[0].content_type, "application/json");
        assert_eq!(writes[0].status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_closed_channel_is_discarded() {
        let (tx, rx) = oneshot::channel::<ServerResponse>();
        drop(rx);
        let outcome = responder()
            .handle(&Failure::internal("late"), &json_request(), Box::new(tx))
            .await;
        assert_eq!(
            outcome,
            ResponseOutcome::Discarded {
                status: StatusCode::INTERNAL_SERVER_ERROR
            }
        );
    }

    #[tokio::test]
    async fn test_oneshot_channel_delivers() {
        let (tx, rx) = oneshot::channel::<ServerResponse>();
        responder()
            .handle(&Failure::unauthorized("who are you"), &json_request(), Box::new(tx))
            .await;
        let response = rx.await.unwrap();
        assert_eq!(response.status, StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_attribute_options_follow_properties() {
        let properties = ErrorProperties {
            include_stacktrace: IncludeStacktrace::OnParam,
            include_exception: true,
            ..Default::default()
        };
        let responder = ErrorResponder::new(Arc::new(DefaultErrorAttributes::default()), properties);

        let plain = RequestContext::new(Method::GET, "/");
        assert!(!responder.attribute_options(&plain).include_stacktrace);
        assert!(responder.attribute_options(&plain).include_exception);
        assert!(responder.attribute_options(&plain.with_query("trace")).include_stacktrace);
    }

    #[test]
    fn test_pretty_json_writer_is_honored() {
        let responder = responder().with_codecs(CodecConfigurer::new().with_writer(JsonMessageWriter::pretty()));
        let (response, fallback) = responder.render(&Failure::not_found("x"), &json_request());
        assert!(!fallback);
        assert!(String::from_utf8(response.body.to_vec()).unwrap().contains("\n  \"status\": 404"));
    }
}
