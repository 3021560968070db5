//! 条件注册
//!
//! 启动期一次性决定某个 Bean 是否注册：所有条件按顺序求值，
//! 全部满足才调用工厂并注册，否则跳过。结果一旦确定即不可变，
//! 只有重建上下文才会重新求值。

use serde::Serialize;
use std::any::{type_name, Any};
use std::marker::PhantomData;
use std::sync::Arc;

use crate::context::{ApplicationContext, SearchStrategy, WebApplicationType};
use crate::error::ApplicationResult;

/// 单个条件的求值结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionOutcome {
    pub matched: bool,
    pub message: String,
}

impl ConditionOutcome {
    pub fn matched(message: impl Into<String>) -> Self {
        Self {
            matched: true,
            message: message.into(),
        }
    }

    pub fn no_match(message: impl Into<String>) -> Self {
        Self {
            matched: false,
            message: message.into(),
        }
    }
}

/// 注册条件
pub trait Condition: Send + Sync {
    fn describe(&self) -> String;

    fn matches(&self, context: &ApplicationContext) -> ConditionOutcome;
}

/// 执行模式匹配时成立
pub struct OnWebApplication(pub WebApplicationType);

impl Condition for OnWebApplication {
    fn describe(&self) -> String {
        format!("@ConditionalOnWebApplication({})", self.0)
    }

    fn matches(&self, context: &ApplicationContext) -> ConditionOutcome {
        let actual = context.web_application_type();
        if actual == self.0 {
            ConditionOutcome::matched(format!("found {} web application", actual))
        } else {
            ConditionOutcome::no_match(format!(
                "required {} web application but running as {}",
                self.0, actual
            ))
        }
    }
}

/// 指定范围内不存在 `T` 类型的 Bean 时成立
pub struct OnMissingBean<T> {
    strategy: SearchStrategy,
    _marker: PhantomData<fn() -> T>,
}

impl<T> OnMissingBean<T> {
    pub fn new(strategy: SearchStrategy) -> Self {
        Self {
            strategy,
            _marker: PhantomData,
        }
    }
}

impl<T: Any + Send + Sync> Condition for OnMissingBean<T> {
    fn describe(&self) -> String {
        format!(
            "@ConditionalOnMissingBean({}, search = {:?})",
            type_name::<T>(),
            self.strategy
        )
    }

    fn matches(&self, context: &ApplicationContext) -> ConditionOutcome {
        if context.contains_bean_by_type::<T>(self.strategy) {
            ConditionOutcome::no_match(format!(
                "found existing bean of type {} ({:?})",
                type_name::<T>(),
                self.strategy
            ))
        } else {
            ConditionOutcome::matched(format!("no bean of type {}", type_name::<T>()))
        }
    }
}

/// 配置项取指定值时成立
pub struct OnProperty {
    pub key: String,
    pub having_value: String,
    pub match_if_missing: bool,
}

impl OnProperty {
    pub fn new(key: impl Into<String>, having_value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            having_value: having_value.into(),
            match_if_missing: false,
        }
    }

    pub fn match_if_missing(mut self, value: bool) -> Self {
        self.match_if_missing = value;
        self
    }
}

impl Condition for OnProperty {
    fn describe(&self) -> String {
        format!("@ConditionalOnProperty({}={})", self.key, self.having_value)
    }

    fn matches(&self, context: &ApplicationContext) -> ConditionOutcome {
        match context.environment().get_string(&self.key) {
            Some(value) if value.eq_ignore_ascii_case(&self.having_value) => {
                ConditionOutcome::matched(format!("{} is {}", self.key, value))
            }
            Some(value) => ConditionOutcome::no_match(format!(
                "{} is {}, expected {}",
                self.key, value, self.having_value
            )),
            None if self.match_if_missing => {
                ConditionOutcome::matched(format!("{} not set, matching by default", self.key))
            }
            None => ConditionOutcome::no_match(format!("{} not set", self.key)),
        }
    }
}

/// 注册状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "lowercase")]
pub enum RegistrationState {
    Unregistered,
    Evaluating,
    Registered,
    Skipped(String),
}

impl RegistrationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RegistrationState::Registered | RegistrationState::Skipped(_))
    }
}

type BeanFactoryFn<T> = Box<dyn FnOnce(&Arc<ApplicationContext>) -> ApplicationResult<T> + Send>;

/// 条件 Bean 定义
pub struct ConditionalBean<T> {
    name: String,
    conditions: Vec<Box<dyn Condition>>,
    factory: Option<BeanFactoryFn<T>>,
    state: RegistrationState,
}

impl<T> ConditionalBean<T>
where
    T: Any + Send + Sync + Clone,
{
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: FnOnce(&Arc<ApplicationContext>) -> ApplicationResult<T> + Send + 'static,
    {
        Self {
            name: name.into(),
            conditions: Vec::new(),
            factory: Some(Box::new(factory)),
            state: RegistrationState::Unregistered,
        }
    }

    pub fn condition(mut self, condition: impl Condition + 'static) -> Self {
        self.conditions.push(Box::new(condition));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &RegistrationState {
        &self.state
    }

    /// 求值并（在条件全部成立时）注册
    ///
    /// 已经到达终态时直接返回记录的状态，不再重复求值或调用工厂。
    pub fn evaluate(&mut self, context: &Arc<ApplicationContext>) -> ApplicationResult<RegistrationState> {
        if self.state.is_terminal() {
            return Ok(self.state.clone());
        }
        self.state = RegistrationState::Evaluating;

        for condition in &self.conditions {
            let outcome = condition.matches(context);
            tracing::debug!(
                bean = %self.name,
                condition = %condition.describe(),
                matched = outcome.matched,
                "{}",
                outcome.message
            );
            if !outcome.matched {
                self.state = RegistrationState::Skipped(format!(
                    "{} did not match: {}",
                    condition.describe(),
                    outcome.message
                ));
                return Ok(self.state.clone());
            }
        }

        let Some(factory) = self.factory.take() else {
            self.state = RegistrationState::Skipped("factory already consumed".to_string());
            return Ok(self.state.clone());
        };

        let bean = match factory(context) {
            Ok(bean) => bean,
            Err(e) => {
                self.state = RegistrationState::Skipped(format!("factory failed: {}", e));
                return Err(e);
            }
        };

        if let Err(e) = context.register_bean(self.name.clone(), bean) {
            self.state = RegistrationState::Skipped(format!("registration failed: {}", e));
            return Err(e);
        }

        self.state = RegistrationState::Registered;
        Ok(self.state.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MapPropertySource;
    use crate::error::ApplicationError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Handler: Send + Sync {
        fn id(&self) -> &'static str;
    }

    struct Builtin;
    impl Handler for Builtin {
        fn id(&self) -> &'static str {
            "builtin"
        }
    }

    struct Custom;
    impl Handler for Custom {
        fn id(&self) -> &'static str {
            "custom"
        }
    }

    fn context(mode: WebApplicationType) -> Arc<ApplicationContext> {
        ApplicationContext::builder()
            .web_application_type(mode)
            .build()
            .unwrap()
    }

    fn builtin_handler() -> ConditionalBean<Arc<dyn Handler>> {
        ConditionalBean::new("handler", |_ctx: &Arc<ApplicationContext>| {
            let handler: Arc<dyn Handler> = Arc::new(Builtin);
            Ok(handler)
        })
        .condition(OnWebApplication(WebApplicationType::Reactive))
        .condition(OnMissingBean::<Arc<dyn Handler>>::new(SearchStrategy::Current))
    }

    #[test]
    fn test_registers_when_reactive_and_missing() {
        let ctx = context(WebApplicationType::Reactive);
        let mut bean = builtin_handler();
        assert_eq!(bean.state(), &RegistrationState::Unregistered);

        let state = bean.evaluate(&ctx).unwrap();
        assert_eq!(state, RegistrationState::Registered);
        assert_eq!(ctx.get_bean_by_type::<Arc<dyn Handler>>().unwrap().id(), "builtin");
    }

    #[test]
    fn test_skipped_when_existing_handler_in_scope() {
        let ctx = context(WebApplicationType::Reactive);
        let custom: Arc<dyn Handler> = Arc::new(Custom);
        ctx.register_bean("customHandler", custom).unwrap();

        let mut bean = builtin_handler();
        let state = bean.evaluate(&ctx).unwrap();
        assert!(matches!(state, RegistrationState::Skipped(ref reason) if reason.contains("existing bean")));

        let active = ctx.beans_of_type::<Arc<dyn Handler>>();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id(), "custom");
    }

    #[test]
    fn test_skipped_when_not_reactive() {
        let ctx = context(WebApplicationType::Servlet);
        let mut bean = builtin_handler();
        let state = bean.evaluate(&ctx).unwrap();
        assert!(matches!(state, RegistrationState::Skipped(ref reason) if reason.contains("servlet")));
        assert!(!ctx.contains_bean("handler"));
    }

    #[test]
    fn test_parent_handler_does_not_block_current_scope() {
        let parent = context(WebApplicationType::Reactive);
        let custom: Arc<dyn Handler> = Arc::new(Custom);
        parent.register_bean("customHandler", custom).unwrap();
        let child = parent.child("child");

        let mut bean = builtin_handler();
        assert_eq!(bean.evaluate(&child).unwrap(), RegistrationState::Registered);
        assert_eq!(child.get_bean_by_type::<Arc<dyn Handler>>().unwrap().id(), "builtin");
    }

    #[test]
    fn test_decision_is_terminal() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let mut bean = ConditionalBean::new("counter", move |_ctx: &Arc<ApplicationContext>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(1u32)
        });

        let ctx = context(WebApplicationType::Reactive);
        assert_eq!(bean.evaluate(&ctx).unwrap(), RegistrationState::Registered);
        assert_eq!(bean.evaluate(&ctx).unwrap(), RegistrationState::Registered);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_error_is_propagated_and_recorded() {
        let ctx = context(WebApplicationType::Reactive);
        let mut bean: ConditionalBean<u32> = ConditionalBean::new("broken", |_ctx: &Arc<ApplicationContext>| {
            Err(ApplicationError::Config("missing collaborator".to_string()))
        });

        assert!(bean.evaluate(&ctx).is_err());
        assert!(matches!(bean.state(), RegistrationState::Skipped(reason) if reason.contains("missing collaborator")));
        assert!(bean.evaluate(&ctx).is_ok());
    }

    #[test]
    fn test_on_property() {
        let ctx = ApplicationContext::builder()
            .add_property_source(Box::new(
                MapPropertySource::new("test").with_str("feature.enabled", "TRUE"),
            ))
            .build()
            .unwrap();

        assert!(OnProperty::new("feature.enabled", "true").matches(&ctx).matched);
        assert!(!OnProperty::new("feature.enabled", "false").matches(&ctx).matched);
        assert!(!OnProperty::new("other.flag", "true").matches(&ctx).matched);
        assert!(OnProperty::new("other.flag", "true")
            .match_if_missing(true)
            .matches(&ctx)
            .matched);
    }
}
