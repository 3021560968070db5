//! 中间件模块
//!
//! 请求日志、请求 ID，以及把失败交给错误处理器的错误处理中间件。

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use futures_util::FutureExt;
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::oneshot;

use crate::constants::REQUEST_ID_HEADER;
use crate::failure::{is_error_status, Failure};
use crate::request::RequestContext;
use crate::responder::{ErrorWebExceptionHandler, ResponseOutcome, ServerResponse};

/// 请求日志中间件
pub async fn request_logging(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let start = Instant::now();

    let response = next.run(req).await;

    let elapsed = start.elapsed();
    let status = response.status();

    tracing::info!(
        method = %method,
        uri = %uri,
        status = %status.as_u16(),
        elapsed = ?elapsed,
        "Request completed"
    );

    response
}

/// 请求 ID 中间件
///
/// 沿用请求中已有的 `X-Request-ID`，否则生成新的 UUID。
pub async fn request_id(mut req: Request, next: Next) -> Response {
    let request_id = req
        .headers()
        .get(REQUEST_ID_HEADER)
        .cloned()
        .unwrap_or_else(generate_request_id);

    req.headers_mut().insert(REQUEST_ID_HEADER, request_id.clone());

    let mut response = next.run(req).await;
    response.headers_mut().insert(REQUEST_ID_HEADER, request_id);
    response
}

fn generate_request_id() -> HeaderValue {
    let id = uuid::Uuid::new_v4().to_string();
    // UUID 只含 ASCII 字符
    HeaderValue::from_str(&id).unwrap_or_else(|_| HeaderValue::from_static("unknown"))
}

/// 等待错误处理器写出响应的上限
pub const HANDLER_WRITE_TIMEOUT: Duration = Duration::from_secs(30);

/// 从框架错误响应体中读取消息的上限
const MAX_MESSAGE_BYTES: usize = 4 * 1024;

/// 错误处理中间件
///
/// - 处理器 panic 时转换为 `Failure::internal`
/// - 响应 Extension 中带有 `Arc<Failure>` 时交给错误处理器重新渲染
/// - 没有响应体或只有纯文本的 4xx/5xx（方法不匹配、提取器拒绝等）同样重新渲染
/// - 处理器自己写出结构化响应体的 4xx/5xx 原样返回，只记录警告
pub async fn error_handling(
    State(handler): State<Arc<dyn ErrorWebExceptionHandler>>,
    req: Request,
    next: Next,
) -> Response {
    let context = RequestContext::from_request_head(req.method(), req.uri(), req.headers());

    let response = match std::panic::AssertUnwindSafe(next.run(req))
        .catch_unwind()
        .await
    {
        Ok(response) => response,
        Err(panic) => {
            let message = if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else if let Some(s) = panic.downcast_ref::<&str>() {
                s.to_string()
            } else {
                "Unknown panic occurred".to_string()
            };

            tracing::error!(path = %context.path, error = %message, "Handler panicked");

            let failure = Failure::internal(message).with_request(context.method.clone(), context.path.clone());
            return respond(handler.as_ref(), &failure, &context, HANDLER_WRITE_TIMEOUT).await;
        }
    };

    if let Some(failure) = response.extensions().get::<Arc<Failure>>().cloned() {
        tracing::debug!(kind = %failure.kind(), "Found Failure in response extensions, delegating to error handler");
        return respond(handler.as_ref(), &failure, &context, HANDLER_WRITE_TIMEOUT).await;
    }

    if is_unrendered_error(&response) {
        let allow = response.headers().get(header::ALLOW).cloned();
        let failure = failure_from_response(response, &context).await;
        tracing::debug!(status = %failure.status(), "Delegating framework error response to error handler");

        let mut rendered = respond(handler.as_ref(), &failure, &context, HANDLER_WRITE_TIMEOUT).await;
        if let Some(allow) = allow {
            rendered.headers_mut().insert(header::ALLOW, allow);
        }
        return rendered;
    }

    if is_error_status(response.status()) {
        tracing::warn!(
            status = %response.status(),
            path = %context.path,
            "Request completed with error status"
        );
    }

    response
}

/// 框架自己生成的错误响应：没有 Content-Type 或者是纯文本
fn is_unrendered_error(response: &Response) -> bool {
    if !is_error_status(response.status()) {
        return false;
    }
    match response.headers().get(header::CONTENT_TYPE) {
        None => true,
        Some(value) => value
            .to_str()
            .is_ok_and(|v| v.trim_start().starts_with("text/plain")),
    }
}

/// 以响应体作为消息，响应体为空时使用状态码的标准描述
async fn failure_from_response(response: Response, context: &RequestContext) -> Failure {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), MAX_MESSAGE_BYTES)
        .await
        .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string())
        .unwrap_or_default();
    let message = if body.is_empty() {
        status.canonical_reason().unwrap_or("Unknown Error").to_string()
    } else {
        body
    };
    Failure::from_status(status, message).with_request(context.method.clone(), context.path.clone())
}

/// 通过一次性通道取回处理器写出的响应，超过 `limit` 未写出时使用固定响应
async fn respond(
    handler: &dyn ErrorWebExceptionHandler,
    failure: &Failure,
    context: &RequestContext,
    limit: Duration,
) -> Response {
    let (tx, rx) = oneshot::channel::<ServerResponse>();
    let outcome = handler.handle(failure, context, Box::new(tx)).await;

    match tokio::time::timeout(limit, rx).await {
        Ok(Ok(response)) => response.into_response(),
        Ok(Err(_)) => {
            tracing::error!(
                handler = handler.name(),
                outcome = ?outcome,
                "Error handler did not write a response"
            );
            fallback_response(&outcome)
        }
        Err(_) => {
            tracing::error!(
                handler = handler.name(),
                outcome = ?outcome,
                timeout = ?limit,
                "Timed out waiting for error handler to write a response"
            );
            fallback_response(&outcome)
        }
    }
}

/// 固定响应体，保留处理器报告的 4xx/5xx 状态码
fn fallback_response(outcome: &ResponseOutcome) -> Response {
    let status = outcome.status();
    let status = if is_error_status(status) {
        status
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    ServerResponse::fallback().with_status(status).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responder::ResponseChannel;
    use async_trait::async_trait;
    use axum::{body::Body, middleware::from_fn, routing::get, Router};
    use tower::ServiceExt;

    struct SilentHandler;

    #[async_trait]
    impl ErrorWebExceptionHandler for SilentHandler {
        fn name(&self) -> &str {
            "silent"
        }

        async fn handle(
            &self,
            failure: &Failure,
            _request: &RequestContext,
            channel: Box<dyn ResponseChannel>,
        ) -> ResponseOutcome {
            drop(channel);
            ResponseOutcome::Discarded {
                status: failure.status(),
            }
        }
    }

    /// 把通道藏起来，既不写也不关闭
    struct HoardingHandler;

    #[async_trait]
    impl ErrorWebExceptionHandler for HoardingHandler {
        fn name(&self) -> &str {
            "hoarding"
        }

        async fn handle(
            &self,
            failure: &Failure,
            _request: &RequestContext,
            channel: Box<dyn ResponseChannel>,
        ) -> ResponseOutcome {
            std::mem::forget(channel);
            ResponseOutcome::Written {
                status: failure.status(),
                content_type: "application/json".to_string(),
                fallback: false,
            }
        }
    }

    #[tokio::test]
    async fn test_request_id_generated_when_missing() {
        let router = Router::new()
            .route(
                "/",
                get(|req: Request| async move {
                    req.headers()
                        .get(REQUEST_ID_HEADER)
                        .map(|v| v.to_str().unwrap_or_default().to_string())
                        .unwrap_or_default()
                }),
            )
            .layer(from_fn(request_id));

        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response.headers().get(REQUEST_ID_HEADER).unwrap().clone();
        assert_eq!(header.len(), 36);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], header.as_bytes());
    }

    #[tokio::test]
    async fn test_handler_that_never_writes_still_yields_response() {
        let handler: Arc<dyn ErrorWebExceptionHandler> = Arc::new(SilentHandler);
        let router = Router::new()
            .route("/", get(|| async { Failure::conflict("taken") }))
            .layer(axum::middleware::from_fn_with_state(handler, error_handling));

        let response = router
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(!bytes.is_empty());
    }

    #[tokio::test]
    async fn test_handler_that_holds_channel_times_out() {
        let context = RequestContext::new(axum::http::Method::GET, "/slow");
        let failure = Failure::new(crate::failure::FailureKind::TooManyRequests, "slow down");

        let response = respond(&HoardingHandler, &failure, &context, Duration::from_millis(20)).await;

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], crate::responder::FALLBACK_BODY.as_bytes());
    }

    #[test]
    fn test_only_bare_or_plain_text_errors_are_rerendered() {
        let bare = StatusCode::METHOD_NOT_ALLOWED.into_response();
        assert!(is_unrendered_error(&bare));

        let plain = (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Expected JSON").into_response();
        assert!(is_unrendered_error(&plain));

        let json = (
            StatusCode::BAD_REQUEST,
            [(header::CONTENT_TYPE, "application/json")],
            r#"{"code":"E1"}"#,
        )
            .into_response();
        assert!(!is_unrendered_error(&json));

        assert!(!is_unrendered_error(&"fine".into_response()));
    }

    #[tokio::test]
    async fn test_failure_from_plain_text_response() {
        let context = RequestContext::new(axum::http::Method::POST, "/echo");

        let plain = (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Expected JSON\n").into_response();
        let failure = failure_from_response(plain, &context).await;
        assert_eq!(failure.kind(), crate::failure::FailureKind::UnsupportedMediaType);
        assert_eq!(failure.message(), "Expected JSON");
        assert_eq!(failure.request().unwrap().path, "/echo");

        let bare = StatusCode::METHOD_NOT_ALLOWED.into_response();
        let failure = failure_from_response(bare, &context).await;
        assert_eq!(failure.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(failure.message(), "Method Not Allowed");
    }
}
