use std::path::Path;
use std::sync::Arc;

use crate::config::{Environment, EnvironmentPropertySource, TomlPropertySource};
use crate::context::{ApplicationContext, ApplicationContextBuilder, WebApplicationType};
use crate::error::ApplicationResult;
use crate::logging::LoggingConfig;
use crate::plugin::{load_plugins, ApplicationPlugin, PluginRegistry};

type Initializer = Box<dyn Fn(&Arc<ApplicationContext>) -> ApplicationResult<()> + Send + Sync>;

/// Fluxguard 应用程序
///
/// 启动顺序：配置源 -> ApplicationContext -> 初始化器 -> 插件 configure -> 插件 startup。
/// 初始化器在自动配置之前执行，因此用户在初始化器里注册的 Bean 优先。
pub struct FluxguardApplication {
    name: String,
    config_files: Vec<String>,
    env_prefix: String,
    profiles: Vec<String>,
    logging_config: Option<LoggingConfig>,
    web_application_type: Option<WebApplicationType>,
    plugins: Vec<Box<dyn ApplicationPlugin>>,
    discover_plugins: bool,
    initializers: Vec<Initializer>,
}

/// 已启动的应用
pub struct RunningApplication {
    context: Arc<ApplicationContext>,
    plugins: PluginRegistry,
}

impl FluxguardApplication {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config_files: vec!["application.toml".to_string()],
            env_prefix: "APP_".to_string(),
            profiles: Vec::new(),
            logging_config: None,
            web_application_type: None,
            plugins: Vec::new(),
            discover_plugins: true,
            initializers: Vec::new(),
        }
    }

    pub fn config_file(mut self, path: impl Into<String>) -> Self {
        self.config_files = vec![path.into()];
        self
    }

    pub fn config_files(mut self, paths: Vec<String>) -> Self {
        self.config_files = paths;
        self
    }

    pub fn env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    pub fn profiles(mut self, profiles: Vec<String>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn logging(mut self, config: LoggingConfig) -> Self {
        self.logging_config = Some(config);
        self
    }

    pub fn web_application_type(mut self, web_application_type: WebApplicationType) -> Self {
        self.web_application_type = Some(web_application_type);
        self
    }

    /// 显式添加插件（与 inventory 发现的插件合并，同名时显式插件优先）
    pub fn plugin(mut self, plugin: impl ApplicationPlugin + 'static) -> Self {
        self.plugins.push(Box::new(plugin));
        self
    }

    /// 是否加载通过 `submit_plugin!` 提交的插件（默认 true）
    pub fn discover_plugins(mut self, discover: bool) -> Self {
        self.discover_plugins = discover;
        self
    }

    pub fn initializer<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<ApplicationContext>) -> ApplicationResult<()> + Send + Sync + 'static,
    {
        self.initializers.push(Box::new(f));
        self
    }

    /// 构建上下文并执行所有插件的配置阶段，不初始化日志、不启动插件
    pub fn prepare(&mut self) -> ApplicationResult<(Arc<ApplicationContext>, PluginRegistry)> {
        let profiles = self.resolve_profiles();
        if profiles.is_empty() {
            tracing::info!("No active profiles set, using default configuration");
        } else {
            tracing::info!("Active profiles: {:?}", profiles);
        }

        let mut builder = ApplicationContext::builder().name(self.name.clone());
        self.load_configurations(&mut builder, &profiles);
        builder = builder
            .add_property_source(Box::new(EnvironmentPropertySource::new(&self.env_prefix)))
            .active_profiles(profiles);
        if let Some(mode) = self.web_application_type {
            builder = builder.web_application_type(mode);
        }
        let context = builder.build()?;

        for initializer in &self.initializers {
            initializer(&context)?;
        }

        let mut registry = PluginRegistry::new();
        for plugin in self.plugins.drain(..) {
            registry.register(plugin);
        }
        if self.discover_plugins {
            for plugin in load_plugins().into_plugins() {
                registry.register(plugin);
            }
        }
        registry.sort_by_priority();
        registry.configure_all(&context)?;

        Ok((context, registry))
    }

    /// 运行应用
    pub async fn run(mut self) -> ApplicationResult<RunningApplication> {
        let logging_config = match self.logging_config.clone() {
            Some(config) => config,
            None => self.bootstrap_logging_config(),
        };
        logging_config.init()?;

        let start = std::time::Instant::now();
        tracing::info!("Starting {} application", self.name);

        let (context, plugins) = self.prepare()?;
        plugins.startup_all(&context).await?;

        tracing::info!(
            mode = %context.web_application_type(),
            "Started {} in {}ms",
            self.name,
            start.elapsed().as_millis()
        );

        Ok(RunningApplication { context, plugins })
    }

    /// 日志在上下文创建之前初始化，这里只读取配置文件与环境变量中的 `logging.*`
    fn bootstrap_logging_config(&self) -> LoggingConfig {
        let env = Environment::new();
        for path in &self.config_files {
            if let Ok(source) = TomlPropertySource::from_file(path) {
                env.add_property_source(Box::new(source));
            }
        }
        env.add_property_source(Box::new(EnvironmentPropertySource::new(&self.env_prefix)));
        LoggingConfig::from_environment(&env)
    }

    /// 激活的 profiles：代码设置优先，其次 `APP_PROFILES_ACTIVE`
    fn resolve_profiles(&self) -> Vec<String> {
        if !self.profiles.is_empty() {
            return self.profiles.clone();
        }
        std::env::var(format!("{}PROFILES_ACTIVE", self.env_prefix))
            .map(|s| {
                s.split(',')
                    .map(|p| p.trim().to_string())
                    .filter(|p| !p.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// 加载配置文件，优先级：application.toml < application-{profile}.toml
    fn load_configurations(&self, builder: &mut ApplicationContextBuilder, profiles: &[String]) {
        for base in &self.config_files {
            Self::try_load_config_file(builder, base, 0);
        }
        for (index, profile) in profiles.iter().enumerate() {
            for base in &self.config_files {
                let path = Self::profile_config_path(base, profile);
                Self::try_load_config_file(builder, &path, 10 + index as i32);
            }
        }
    }

    /// application.toml -> application-dev.toml
    fn profile_config_path(base: &str, profile: &str) -> String {
        match base.rfind('.') {
            Some(dot) => {
                let (name, ext) = base.split_at(dot);
                format!("{}-{}{}", name, profile, ext)
            }
            None => format!("{}-{}", base, profile),
        }
    }

    fn try_load_config_file(builder: &mut ApplicationContextBuilder, path: &str, priority: i32) {
        if !Path::new(path).exists() {
            tracing::debug!("Configuration file not found: {}", path);
            return;
        }
        match TomlPropertySource::from_file(path) {
            Ok(source) => {
                tracing::info!("Loaded configuration from: {} (priority: {})", path, priority);
                builder.add_property_source_mut(Box::new(source.with_priority(priority)));
            }
            Err(e) => tracing::warn!("Failed to load {}: {}", path, e),
        }
    }
}

impl Default for FluxguardApplication {
    fn default() -> Self {
        Self::new("FluxguardApplication")
    }
}

impl RunningApplication {
    pub fn context(&self) -> &Arc<ApplicationContext> {
        &self.context
    }

    /// 有需要保活的插件时等待 Ctrl-C，然后依次关闭插件
    pub async fn wait_for_shutdown(self) -> ApplicationResult<()> {
        if self.plugins.has_keep_alive_plugin() {
            tracing::info!("Press Ctrl+C to stop");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
        }
        self.plugins.shutdown_all(&self.context).await;
        tracing::info!("Application stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SearchStrategy;
    use crate::error::ApplicationError;

    struct MarkerPlugin;

    #[async_trait::async_trait]
    impl ApplicationPlugin for MarkerPlugin {
        fn name(&self) -> &str {
            "marker"
        }

        fn configure(&self, context: &Arc<ApplicationContext>) -> ApplicationResult<()> {
            // 初始化器已经注册过时不覆盖
            if !context.contains_bean_by_type::<&'static str>(SearchStrategy::Current) {
                context.register_bean("marker", "from-plugin")?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_profile_config_path() {
        assert_eq!(
            FluxguardApplication::profile_config_path("application.toml", "dev"),
            "application-dev.toml"
        );
        assert_eq!(
            FluxguardApplication::profile_config_path("config/app", "prod"),
            "config/app-prod"
        );
    }

    #[test]
    fn test_prepare_runs_plugins() {
        let mut app = FluxguardApplication::new("test")
            .config_file("does-not-exist.toml")
            .discover_plugins(false)
            .plugin(MarkerPlugin);

        let (ctx, plugins) = app.prepare().unwrap();
        assert_eq!(plugins.len(), 1);
        assert_eq!(ctx.get_bean::<&'static str>("marker").unwrap(), "from-plugin");
    }

    #[test]
    fn test_initializer_beans_take_precedence() {
        let mut app = FluxguardApplication::new("test")
            .config_file("does-not-exist.toml")
            .discover_plugins(false)
            .web_application_type(WebApplicationType::Servlet)
            .plugin(MarkerPlugin)
            .initializer(|ctx| ctx.register_bean("userMarker", "from-user"));

        let (ctx, _) = app.prepare().unwrap();
        assert_eq!(ctx.web_application_type(), WebApplicationType::Servlet);
        assert_eq!(ctx.get_bean_by_type::<&'static str>().unwrap(), "from-user");
        assert!(!ctx.contains_bean("marker"));
    }

    #[test]
    fn test_initializer_error_aborts_prepare() {
        let mut app = FluxguardApplication::new("test")
            .config_file("does-not-exist.toml")
            .discover_plugins(false)
            .initializer(|_| Err(ApplicationError::Config("bad".to_string())));

        assert!(matches!(app.prepare(), Err(ApplicationError::Config(_))));
    }
}
