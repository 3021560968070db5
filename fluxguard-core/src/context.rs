use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::any::{type_name, Any, TypeId};
use std::str::FromStr;
use std::sync::Arc;

use crate::config::{Environment, PropertySource};
use crate::constants;
use crate::error::{ApplicationResult, RegistryError};

/// 执行模式
///
/// 决定哪些 Web 组件适用：`Reactive` 为基于 tokio / axum 的异步服务器。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WebApplicationType {
    Reactive,
    Servlet,
    None,
}

impl Default for WebApplicationType {
    fn default() -> Self {
        WebApplicationType::Reactive
    }
}

impl FromStr for WebApplicationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reactive" => Ok(WebApplicationType::Reactive),
            "servlet" => Ok(WebApplicationType::Servlet),
            "none" => Ok(WebApplicationType::None),
            other => Err(format!("Unknown web application type: {}", other)),
        }
    }
}

impl std::fmt::Display for WebApplicationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WebApplicationType::Reactive => "reactive",
            WebApplicationType::Servlet => "servlet",
            WebApplicationType::None => "none",
        };
        f.write_str(s)
    }
}

/// Bean 查找范围
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchStrategy {
    /// 仅当前上下文
    Current,
    /// 仅祖先上下文（不含当前）
    Ancestors,
    /// 当前上下文及所有祖先
    All,
}

struct BeanEntry {
    name: String,
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

/// 应用上下文
///
/// 持有 Environment、执行模式以及按注册顺序保存的 Bean。
/// Bean 以 `T: Clone` 的值保存，读取时克隆返回；
/// 角色型 Bean 通常注册为 `Arc<dyn Trait>`。
pub struct ApplicationContext {
    name: String,
    environment: Arc<Environment>,
    web_application_type: WebApplicationType,
    parent: Option<Arc<ApplicationContext>>,
    beans: RwLock<Vec<BeanEntry>>,
}

impl std::fmt::Debug for ApplicationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let beans: Vec<String> = self
            .beans
            .read()
            .iter()
            .map(|b| format!("{}: {}", b.name, b.type_name))
            .collect();
        f.debug_struct("ApplicationContext")
            .field("name", &self.name)
            .field("web_application_type", &self.web_application_type)
            .field("beans", &beans)
            .field("parent", &self.parent.as_ref().map(|p| p.name()))
            .finish()
    }
}

impl ApplicationContext {
    pub fn builder() -> ApplicationContextBuilder {
        ApplicationContextBuilder::default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn environment(&self) -> &Arc<Environment> {
        &self.environment
    }

    pub fn web_application_type(&self) -> WebApplicationType {
        self.web_application_type
    }

    pub fn parent(&self) -> Option<&Arc<ApplicationContext>> {
        self.parent.as_ref()
    }

    /// 创建子上下文，共享 Environment 与执行模式
    pub fn child(self: &Arc<Self>, name: impl Into<String>) -> Arc<ApplicationContext> {
        Arc::new(ApplicationContext {
            name: name.into(),
            environment: Arc::clone(&self.environment),
            web_application_type: self.web_application_type,
            parent: Some(Arc::clone(self)),
            beans: RwLock::new(Vec::new()),
        })
    }

    /// 注册 Bean，名称在当前上下文内必须唯一
    pub fn register_bean<T>(&self, name: impl Into<String>, bean: T) -> ApplicationResult<()>
    where
        T: Any + Send + Sync + Clone,
    {
        let name = name.into();
        let mut beans = self.beans.write();
        if beans.iter().any(|b| b.name == name) {
            return Err(RegistryError::DuplicateBean(name).into());
        }

        tracing::debug!(
            context = %self.name,
            bean = %name,
            bean_type = type_name::<T>(),
            "Registering bean"
        );
        beans.push(BeanEntry {
            name,
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            value: Arc::new(bean),
        });
        Ok(())
    }

    /// 按名称获取 Bean（当前上下文优先，其次祖先）
    pub fn get_bean<T>(&self, name: &str) -> ApplicationResult<T>
    where
        T: Any + Send + Sync + Clone,
    {
        let found = {
            let beans = self.beans.read();
            beans
                .iter()
                .find(|b| b.name == name)
                .map(|b| Arc::clone(&b.value))
        };

        match found {
            Some(value) => value.downcast_ref::<T>().cloned().ok_or_else(|| {
                RegistryError::TypeMismatch {
                    name: name.to_string(),
                    expected: type_name::<T>(),
                }
                .into()
            }),
            None => match &self.parent {
                Some(parent) => parent.get_bean(name),
                None => Err(RegistryError::BeanNotFound(name.to_string()).into()),
            },
        }
    }

    /// 按类型获取 Bean，多个候选时先注册的胜出
    pub fn get_bean_by_type<T>(&self) -> ApplicationResult<T>
    where
        T: Any + Send + Sync + Clone,
    {
        self.find_local::<T>()
            .into_iter()
            .next()
            .map(Ok)
            .unwrap_or_else(|| match &self.parent {
                Some(parent) => parent.get_bean_by_type::<T>(),
                None => Err(RegistryError::BeanNotFound(type_name::<T>().to_string()).into()),
            })
    }

    /// 所有该类型的 Bean：当前上下文按注册顺序在前，祖先在后
    pub fn beans_of_type<T>(&self) -> Vec<T>
    where
        T: Any + Send + Sync + Clone,
    {
        let mut result = self.find_local::<T>();
        if let Some(parent) = &self.parent {
            result.extend(parent.beans_of_type::<T>());
        }
        result
    }

    pub fn contains_bean_by_type<T>(&self, strategy: SearchStrategy) -> bool
    where
        T: Any + Send + Sync,
    {
        let in_current = || {
            let id = TypeId::of::<T>();
            self.beans.read().iter().any(|b| b.type_id == id)
        };
        let in_ancestors = || {
            self.parent
                .as_ref()
                .is_some_and(|p| p.contains_bean_by_type::<T>(SearchStrategy::All))
        };

        match strategy {
            SearchStrategy::Current => in_current(),
            SearchStrategy::Ancestors => in_ancestors(),
            SearchStrategy::All => in_current() || in_ancestors(),
        }
    }

    pub fn contains_bean(&self, name: &str) -> bool {
        self.beans.read().iter().any(|b| b.name == name)
            || self.parent.as_ref().is_some_and(|p| p.contains_bean(name))
    }

    /// 当前上下文的 Bean 名称（注册顺序）
    pub fn bean_names(&self) -> Vec<String> {
        self.beans.read().iter().map(|b| b.name.clone()).collect()
    }

    fn find_local<T>(&self) -> Vec<T>
    where
        T: Any + Send + Sync + Clone,
    {
        let id = TypeId::of::<T>();
        self.beans
            .read()
            .iter()
            .filter(|b| b.type_id == id)
            .filter_map(|b| b.value.downcast_ref::<T>().cloned())
            .collect()
    }
}

/// ApplicationContext 构建器
#[derive(Default)]
pub struct ApplicationContextBuilder {
    name: Option<String>,
    environment: Option<Arc<Environment>>,
    sources: Vec<Box<dyn PropertySource>>,
    profiles: Vec<String>,
    web_application_type: Option<WebApplicationType>,
    parent: Option<Arc<ApplicationContext>>,
}

impl ApplicationContextBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn environment(mut self, environment: Arc<Environment>) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn add_property_source(mut self, source: Box<dyn PropertySource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn add_property_source_mut(&mut self, source: Box<dyn PropertySource>) {
        self.sources.push(source);
    }

    pub fn active_profiles(mut self, profiles: Vec<String>) -> Self {
        self.profiles = profiles;
        self
    }

    /// 显式指定执行模式，优先于 `fluxguard.main.web-application-type`
    pub fn web_application_type(mut self, web_application_type: WebApplicationType) -> Self {
        self.web_application_type = Some(web_application_type);
        self
    }

    pub fn parent(mut self, parent: Arc<ApplicationContext>) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn build(self) -> ApplicationResult<Arc<ApplicationContext>> {
        let environment = self
            .environment
            .unwrap_or_else(|| Arc::new(Environment::new()));
        for source in self.sources {
            environment.add_property_source(source);
        }
        if !self.profiles.is_empty() {
            environment.set_active_profiles(self.profiles);
        }

        let web_application_type = self
            .web_application_type
            .or_else(|| environment.get_parsed(constants::MAIN_WEB_APPLICATION_TYPE))
            .unwrap_or_default();

        let context = Arc::new(ApplicationContext {
            name: self.name.unwrap_or_else(|| "application".to_string()),
            environment: Arc::clone(&environment),
            web_application_type,
            parent: self.parent,
            beans: RwLock::new(Vec::new()),
        });
        context.register_bean(constants::ENVIRONMENT_BEAN_NAME, environment)?;

        tracing::debug!(
            context = %context.name,
            mode = %web_application_type,
            "ApplicationContext created"
        );
        Ok(context)
    }
}
