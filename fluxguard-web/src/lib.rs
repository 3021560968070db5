//! # Fluxguard Web
//!
//! 基于 Axum 的响应式 Web 服务器的集中式错误处理
//!
//! ## 核心特性
//!
//! - **统一错误处理** - 处理器返回 [`Failure`]，由激活的 [`ErrorWebExceptionHandler`] 渲染
//! - **内容协商** - 按 `Accept` 头在 JSON、纯文本和 HTML 视图之间选择
//! - **条件装配** - 仅在响应式模式下、且用户没有注册自己的处理器时装配默认实现
//! - **可靠降级** - 渲染失败时写出固定格式的 500 响应

pub mod attributes;
pub mod autoconfig;
pub mod codec;
pub mod constants;
pub mod error;
pub mod failure;
pub mod middleware;
pub mod negotiation;
pub mod plugin;
pub mod request;
pub mod responder;
pub mod server;
pub mod view;

pub use attributes::{DefaultErrorAttributes, ErrorAttributeOptions, ErrorAttributes, ErrorAttributesExtractor};
pub use autoconfig::{AutoConfigurationReport, ErrorWebFluxAutoConfiguration, ErrorWebFluxPlugin};
pub use codec::{CodecConfigurer, HttpMessageWriter, JsonMessageWriter, PlainTextMessageWriter};
pub use error::{ChannelClosed, RenderError};
pub use failure::{Failure, FailureKind};
pub use negotiation::{AcceptHeaderNegotiator, ContentNegotiator, MediaType};
pub use plugin::WebPlugin;
pub use request::RequestContext;
pub use responder::{ErrorResponder, ErrorWebExceptionHandler, ResponseChannel, ResponseOutcome, ServerResponse};
pub use server::{ErrorProperties, FluxguardWebServer, IncludeStacktrace, ServerProperties};
pub use view::{TeraViewResolver, ViewResolver, WhitelabelViewResolver};

pub mod prelude {
    //! 预导入模块

    pub use crate::attributes::*;
    pub use crate::autoconfig::*;
    pub use crate::codec::*;
    pub use crate::error::*;
    pub use crate::failure::*;
    pub use crate::negotiation::*;
    pub use crate::plugin::*;
    pub use crate::request::*;
    pub use crate::responder::*;
    pub use crate::server::*;
    pub use crate::view::*;

    pub use axum;
    pub use axum::extract::{Json, Path, Query, State};
    pub use axum::http::StatusCode;
    pub use axum::response::{IntoResponse, Response};
    pub use axum::routing::{delete, get, patch, post, put};
    pub use axum::Router;
}
