//! 错误处理自动配置
//!
//! 启动时按顺序求值一组条件 Bean：
//! 只有在响应式模式下、且当前上下文中还没有同类 Bean 时才注册默认实现，
//! 用户在初始化阶段注册的实现始终优先。

use fluxguard_core::prelude::*;
use serde::Serialize;
use std::any::Any;
use std::sync::Arc;

use crate::attributes::{DefaultErrorAttributes, ErrorAttributesExtractor};
use crate::codec::CodecConfigurer;
use crate::constants::*;
use crate::negotiation::{AcceptHeaderNegotiator, ContentNegotiator};
use crate::responder::{ErrorResponder, ErrorWebExceptionHandler};
use crate::server::{ErrorProperties, ServerProperties};
use crate::view::{TeraViewResolver, ViewResolver, WhitelabelViewResolver};

/// 一次自动配置的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AutoConfigurationReport {
    entries: Vec<ReportEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportEntry {
    pub bean: String,
    #[serde(flatten)]
    pub state: RegistrationState,
}

impl AutoConfigurationReport {
    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn state(&self, bean: &str) -> Option<&RegistrationState> {
        self.entries.iter().find(|e| e.bean == bean).map(|e| &e.state)
    }

    pub fn is_registered(&self, bean: &str) -> bool {
        matches!(self.state(bean), Some(RegistrationState::Registered))
    }

    fn evaluate<T>(&mut self, mut bean: ConditionalBean<T>, context: &Arc<ApplicationContext>) -> ApplicationResult<()>
    where
        T: Any + Send + Sync + Clone,
    {
        let state = bean.evaluate(context)?;
        match &state {
            RegistrationState::Registered => {
                tracing::info!(context = %context.name(), bean = bean.name(), "Auto-configured bean");
            }
            RegistrationState::Skipped(reason) => {
                tracing::debug!(context = %context.name(), bean = bean.name(), reason = %reason, "Skipped bean");
            }
            _ => {}
        }
        self.entries.push(ReportEntry {
            bean: bean.name().to_string(),
            state,
        });
        Ok(())
    }
}

/// 错误处理自动配置
#[derive(Debug, Default, Clone, Copy)]
pub struct ErrorWebFluxAutoConfiguration;

impl ErrorWebFluxAutoConfiguration {
    pub fn new() -> Self {
        Self
    }

    /// 求值并注册所有错误处理相关的 Bean
    pub fn apply(&self, context: &Arc<ApplicationContext>) -> ApplicationResult<AutoConfigurationReport> {
        let mut report = AutoConfigurationReport::default();

        report.evaluate(
            ConditionalBean::new(SERVER_PROPERTIES_BEAN_NAME, |ctx: &Arc<ApplicationContext>| {
                Ok(ServerProperties::from_environment(ctx.environment()))
            })
            .condition(OnMissingBean::<ServerProperties>::new(SearchStrategy::All)),
            context,
        )?;

        report.evaluate(
            ConditionalBean::new(CODEC_CONFIGURER_BEAN_NAME, |_: &Arc<ApplicationContext>| {
                Ok(CodecConfigurer::with_defaults())
            })
            .condition(OnMissingBean::<CodecConfigurer>::new(SearchStrategy::All)),
            context,
        )?;

        report.evaluate(
            ConditionalBean::new(TERA_VIEW_RESOLVER_BEAN_NAME, |ctx: &Arc<ApplicationContext>| {
                let dir = ctx.environment().get_string_or(TERA_TEMPLATE_DIR, "templates");
                let resolver = TeraViewResolver::from_dir(&dir)
                    .map_err(|e| ApplicationError::Config(e.to_string()))?;
                Ok(Arc::new(resolver) as Arc<dyn ViewResolver>)
            })
            .condition(OnProperty::new(TERA_ENABLED, "true")),
            context,
        )?;

        let error = ServerProperties::resolve(context).error;

        let include_exception = error.include_exception;
        report.evaluate(
            ConditionalBean::new(ERROR_ATTRIBUTES_BEAN_NAME, move |_: &Arc<ApplicationContext>| {
                Ok(Arc::new(DefaultErrorAttributes::new(include_exception)) as Arc<dyn ErrorAttributesExtractor>)
            })
            .condition(OnWebApplication(WebApplicationType::Reactive))
            .condition(OnMissingBean::<Arc<dyn ErrorAttributesExtractor>>::new(SearchStrategy::Current)),
            context,
        )?;

        report.evaluate(
            ConditionalBean::new(ERROR_HANDLER_BEAN_NAME, move |ctx: &Arc<ApplicationContext>| {
                Ok(Arc::new(Self::error_responder(ctx, error)) as Arc<dyn ErrorWebExceptionHandler>)
            })
            .condition(OnWebApplication(WebApplicationType::Reactive))
            .condition(OnMissingBean::<Arc<dyn ErrorWebExceptionHandler>>::new(SearchStrategy::Current)),
            context,
        )?;

        Ok(report)
    }

    /// 用容器中的协作者组装默认错误处理器，缺失的协作者使用默认实现
    pub fn error_responder(context: &ApplicationContext, properties: ErrorProperties) -> ErrorResponder {
        let extractor = context
            .get_bean_by_type::<Arc<dyn ErrorAttributesExtractor>>()
            .unwrap_or_else(|_| Arc::new(DefaultErrorAttributes::new(properties.include_exception)));

        let mut resolvers = context.beans_of_type::<Arc<dyn ViewResolver>>();
        if properties.whitelabel_enabled {
            resolvers.push(Arc::new(WhitelabelViewResolver));
        }

        let codecs = context
            .get_bean_by_type::<CodecConfigurer>()
            .unwrap_or_else(|_| CodecConfigurer::with_defaults());

        let negotiator = context
            .get_bean_by_type::<Arc<dyn ContentNegotiator>>()
            .unwrap_or_else(|_| Arc::new(AcceptHeaderNegotiator));

        tracing::debug!(
            view_resolvers = resolvers.len(),
            codecs = ?codecs,
            "Assembling error responder"
        );

        ErrorResponder::new(extractor, properties)
            .with_view_resolvers(resolvers)
            .with_codecs(codecs)
            .with_negotiator(negotiator)
    }
}

/// 错误处理自动配置插件
///
/// 优先级 80，在 Web 插件之前完成配置。
#[derive(Default)]
pub struct ErrorWebFluxPlugin;

#[fluxguard_core::async_trait::async_trait]
impl ApplicationPlugin for ErrorWebFluxPlugin {
    fn name(&self) -> &str {
        "fluxguard-error-webflux"
    }

    fn priority(&self) -> i32 {
        80
    }

    fn configure(&self, context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        let report = ErrorWebFluxAutoConfiguration::new().apply(context)?;
        tracing::info!(
            registered = report.entries().iter().filter(|e| e.state == RegistrationState::Registered).count(),
            skipped = report.entries().iter().filter(|e| e.state != RegistrationState::Registered).count(),
            "Error handling auto-configuration complete"
        );
        Ok(())
    }
}

fluxguard_core::submit_plugin!(ErrorWebFluxPlugin);
