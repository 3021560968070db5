//! 插件机制
//!
//! 自动配置以插件形式提供，启动时按优先级依次执行 `configure`，
//! 优先级数字越小越先执行，因此先执行的插件注册的 Bean 会让后续插件的
//! `OnMissingBean` 条件失效。

use async_trait::async_trait;
use std::sync::Arc;

use crate::context::ApplicationContext;
use crate::error::ApplicationResult;

/// 应用插件 trait
#[async_trait]
pub trait ApplicationPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// 插件优先级（数字越小优先级越高）
    fn priority(&self) -> i32 {
        100
    }

    /// 配置阶段 - 注册 Bean
    fn configure(&self, _context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        Ok(())
    }

    /// 启动阶段 - 所有插件配置完成后执行，例如启动 Web 服务器
    async fn on_startup(&self, _context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        Ok(())
    }

    /// 关闭阶段
    async fn on_shutdown(&self, _context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        Ok(())
    }

    /// 是否需要保持应用运行（如 Web 服务器）
    fn keep_alive(&self) -> bool {
        false
    }
}

/// 插件注册表
pub struct PluginRegistry {
    plugins: Vec<Box<dyn ApplicationPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: Vec::new(),
        }
    }

    /// 注册插件，同名插件只保留先注册的一个
    pub fn register(&mut self, plugin: Box<dyn ApplicationPlugin>) {
        if self.plugins.iter().any(|p| p.name() == plugin.name()) {
            tracing::debug!("Plugin '{}' already registered, ignoring duplicate", plugin.name());
            return;
        }
        tracing::debug!("Registering plugin: {}", plugin.name());
        self.plugins.push(plugin);
    }

    /// 按优先级排序（稳定排序，同优先级保持注册顺序）
    pub fn sort_by_priority(&mut self) {
        self.plugins.sort_by_key(|p| p.priority());
    }

    pub fn plugins(&self) -> &[Box<dyn ApplicationPlugin>] {
        &self.plugins
    }

    pub fn into_plugins(self) -> Vec<Box<dyn ApplicationPlugin>> {
        self.plugins
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn configure_all(&self, context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        for plugin in &self.plugins {
            tracing::info!("Configuring plugin: {}", plugin.name());
            plugin.configure(context)?;
        }
        Ok(())
    }

    pub async fn startup_all(&self, context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
        for plugin in &self.plugins {
            tracing::info!("Starting plugin: {}", plugin.name());
            plugin.on_startup(context).await?;
        }
        Ok(())
    }

    /// 逆序关闭，单个插件失败只记录日志
    pub async fn shutdown_all(&self, context: &Arc<ApplicationContext>) {
        for plugin in self.plugins.iter().rev() {
            tracing::info!("Shutting down plugin: {}", plugin.name());
            if let Err(e) = plugin.on_shutdown(context).await {
                tracing::error!("Failed to shutdown plugin {}: {}", plugin.name(), e);
            }
        }
    }

    pub fn has_keep_alive_plugin(&self) -> bool {
        self.plugins.iter().any(|p| p.keep_alive())
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// 将插件提交到全局注册表
#[macro_export]
macro_rules! submit_plugin {
    ($plugin_type:ty) => {
        $crate::inventory::submit! {
            $crate::PluginSubmission {
                create: || Box::new(<$plugin_type>::default())
            }
        }
    };
}

/// 插件提交结构
pub struct PluginSubmission {
    pub create: fn() -> Box<dyn ApplicationPlugin>,
}

inventory::collect!(PluginSubmission);

/// 从全局注册表加载所有插件
pub fn load_plugins() -> PluginRegistry {
    let mut registry = PluginRegistry::new();

    for submission in inventory::iter::<PluginSubmission> {
        registry.register((submission.create)());
    }

    registry.sort_by_priority();
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording {
        name: &'static str,
        priority: i32,
        log: Arc<Mutex<Vec<String>>>,
        fail_shutdown: bool,
    }

    #[async_trait]
    impl ApplicationPlugin for Recording {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn configure(&self, _context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
            self.log.lock().push(format!("configure:{}", self.name));
            Ok(())
        }

        async fn on_shutdown(&self, _context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
            self.log.lock().push(format!("shutdown:{}", self.name));
            if self.fail_shutdown {
                return Err(crate::error::ApplicationError::plugin(self.name, "boom"));
            }
            Ok(())
        }
    }

    fn registry(log: &Arc<Mutex<Vec<String>>>) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        for (name, priority, fail_shutdown) in [("web", 90, false), ("errors", 80, true), ("web", 10, false)] {
            registry.register(Box::new(Recording {
                name,
                priority,
                log: Arc::clone(log),
                fail_shutdown,
            }));
        }
        registry.sort_by_priority();
        registry
    }

    #[test]
    fn test_configure_in_priority_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&log);
        let ctx = ApplicationContext::builder().build().unwrap();

        assert_eq!(registry.len(), 2);
        registry.configure_all(&ctx).unwrap();
        assert_eq!(*log.lock(), vec!["configure:errors", "configure:web"]);
    }

    #[tokio::test]
    async fn test_shutdown_in_reverse_order_and_tolerates_errors() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let registry = registry(&log);
        let ctx = ApplicationContext::builder().build().unwrap();

        registry.shutdown_all(&ctx).await;
        assert_eq!(*log.lock(), vec!["shutdown:web", "shutdown:errors"]);
        assert!(!registry.has_keep_alive_plugin());
    }
}
