//! 网关业务错误
//!
//! 业务代码只需要把自己的错误转换为 `Failure`，剩下的交给错误处理器。

use fluxguard_web::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Route '{0}' is not configured")]
    RouteNotFound(String),

    #[error("Upstream '{upstream}' is unavailable")]
    UpstreamUnavailable {
        upstream: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Rate limit exceeded for client {0}")]
    RateLimited(String),
}

impl From<GatewayError> for Failure {
    fn from(error: GatewayError) -> Self {
        match &error {
            GatewayError::RouteNotFound(_) => Failure::not_found(error.to_string()),
            GatewayError::RateLimited(_) => Failure::new(FailureKind::TooManyRequests, error.to_string()),
            GatewayError::UpstreamUnavailable { .. } => {
                Failure::new(FailureKind::ServiceUnavailable, error.to_string()).with_cause(error)
            }
        }
    }
}
