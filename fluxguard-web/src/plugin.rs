//! Fluxguard Web 插件
//!
//! 提供 Web 服务器自动装配

use axum::Router;
use fluxguard_core::prelude::*;
use std::sync::Arc;

use crate::constants::{ROUTER_BEAN_NAME, SERVER_PROPERTIES_BEAN_NAME};
use crate::server::{FluxguardWebServer, ServerProperties};

/// Web 应用插件
///
/// 配置阶段注册 `ServerProperties`，启动阶段在后台启动服务器。
/// 路由取自名为 `router` 的 Bean，不存在时使用空路由。
#[derive(Default)]
pub struct WebPlugin;

#[fluxguard_core::async_trait::async_trait]
impl ApplicationPlugin for WebPlugin {
    fn name(&self) -> &str {
        "fluxguard-web"
    }

    fn priority(&self) -> i32 {
        90 // 在错误处理自动配置之后
    }

    fn configure(&self, context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        let mut properties = ConditionalBean::new(SERVER_PROPERTIES_BEAN_NAME, |ctx: &Arc<ApplicationContext>| {
            Ok(ServerProperties::from_environment(ctx.environment()))
        })
        .condition(OnMissingBean::<ServerProperties>::new(SearchStrategy::All));

        if properties.evaluate(context)? == RegistrationState::Registered {
            tracing::info!("ServerProperties configured");
        }
        Ok(())
    }

    /// 创建服务器并在后台运行
    async fn on_startup(&self, context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        let router = match context.get_bean::<Router>(ROUTER_BEAN_NAME) {
            Ok(router) => router,
            Err(_) => {
                tracing::warn!("No '{}' bean registered, serving an empty router", ROUTER_BEAN_NAME);
                Router::new()
            }
        };

        // 创建与绑定都在当前任务中完成，失败时启动失败
        let server = FluxguardWebServer::new(context)?.with_router(router);
        let listener = server.bind().await?;

        tokio::spawn(async move {
            if let Err(e) = server.serve(listener).await {
                tracing::error!("Web server error: {}", e);
            }
        });

        Ok(())
    }

    async fn on_shutdown(&self, _context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        tracing::info!("Web server shutting down");
        Ok(())
    }

    fn keep_alive(&self) -> bool {
        true
    }
}

fluxguard_core::submit_plugin!(WebPlugin);
