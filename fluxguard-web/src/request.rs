use http::{header, request::Parts, HeaderMap, Method, Uri};

use crate::constants::REQUEST_ID_HEADER;
use crate::negotiation::MediaType;

/// 正在处理的请求的上下文
///
/// 只保存错误处理需要的信息，不持有请求体或连接。
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub accept: Vec<MediaType>,
    pub request_id: Option<String>,
}

impl RequestContext {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: None,
            accept: vec![MediaType::all()],
            request_id: None,
        }
    }

    pub fn from_parts(parts: &Parts) -> Self {
        Self::from_request_head(&parts.method, &parts.uri, &parts.headers)
    }

    pub fn from_request_head(method: &Method, uri: &Uri, headers: &HeaderMap) -> Self {
        let accept = headers
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok());
        Self {
            method: method.clone(),
            path: uri.path().to_string(),
            query: uri.query().map(String::from),
            accept: MediaType::parse_accept(accept),
            request_id: headers
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
        }
    }

    pub fn with_accept(mut self, accept: &str) -> Self {
        self.accept = MediaType::parse_accept(Some(accept));
        self
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// 查询参数是否为真：`?trace`、`?trace=true`、`?trace=1` 都算，`?trace=false` 不算
    pub fn query_flag(&self, name: &str) -> bool {
        self.query
            .as_deref()
            .unwrap_or_default()
            .split('&')
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
                (key == name).then_some(value)
            })
            .any(|value| !matches!(value.to_ascii_lowercase().as_str(), "false" | "0" | "no"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request;

    #[test]
    fn test_from_parts() {
        let (parts, _) = Request::builder()
            .method(Method::GET)
            .uri("/orders/7?trace=true&x=1")
            .header(header::ACCEPT, "application/json")
            .header(REQUEST_ID_HEADER, "abc-123")
            .body(())
            .unwrap()
            .into_parts();

        let ctx = RequestContext::from_parts(&parts);
        assert_eq!(ctx.method, Method::GET);
        assert_eq!(ctx.path, "/orders/7");
        assert_eq!(ctx.query.as_deref(), Some("trace=true&x=1"));
        assert_eq!(ctx.accept, vec![MediaType::application_json()]);
        assert_eq!(ctx.request_id.as_deref(), Some("abc-123"));
    }

    #[test]
    fn test_query_flag() {
        let ctx = RequestContext::new(Method::GET, "/");
        assert!(!ctx.query_flag("trace"));
        assert!(ctx.clone().with_query("trace").query_flag("trace"));
        assert!(ctx.clone().with_query("a=1&trace=1").query_flag("trace"));
        assert!(!ctx.clone().with_query("trace=false").query_flag("trace"));
        assert!(!ctx.with_query("tracer=true").query_flag("trace"));
    }
}
