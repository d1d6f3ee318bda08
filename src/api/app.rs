//! 应用
//!
//! [`Application`] 是一次引导的根：它本身也是一个模块单元，初始化过程就是
//! 运行依赖图加载器。构造立即返回，引导在后台进行；所有模块结束后，
//! 根单元在存在失败模块或缺失能力时进入失败状态。
//!
//! # 示例
//!
//! ```rust,no_run
//! use chips_boot::api::{AppOptions, Application};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Application::new(AppOptions::new("/srv/app"));
//!     if let Err(e) = app.on_ready().await {
//!         eprintln!("引导失败: {e}");
//!         std::process::exit(app.exit_code().unwrap_or(1));
//!     }
//!     let db = app.wait_for_module("db").await.unwrap();
//!     println!("{} ready", db.name());
//! }
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use futures::future::try_join_all;

use crate::builtin;
use crate::core::args::ProcessArgs;
use crate::core::config::{ConfigStore, CoreConfig, DEFAULT_CONFIG_FILE};
use crate::core::services::LogLevel;
use crate::module::context::ModuleContext;
use crate::module::loader::{DependencyGraphLoader, LoadReport, LoaderOptions};
use crate::module::manifest::ModuleManifest;
use crate::module::parser::{FsManifestSource, ManifestReader, ManifestSource, StaticManifests};
use crate::module::registry::ModuleRegistry;
use crate::module::unit::{Module, ModuleHandle, ModuleUnit, UnitState};
use crate::utils::{CoreError, Result};

/// 根模块的默认名称
pub const ROOT_MODULE_NAME: &str = "chips-boot";

static INSTANCE: OnceLock<Application> = OnceLock::new();

// ============================================================================
// 选项
// ============================================================================

/// 应用选项
#[derive(Clone)]
pub struct AppOptions {
    /// 应用根目录
    pub root_dir: PathBuf,
    /// 配置文档
    pub config: ConfigStore,
    /// 进程参数
    pub args: ProcessArgs,
    /// 模块工厂
    pub registry: ModuleRegistry,
    /// 额外的描述来源，排在模块目录之后
    pub sources: Vec<Arc<dyn ManifestSource>>,
}

impl std::fmt::Debug for AppOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppOptions")
            .field("root_dir", &self.root_dir)
            .field("args", &self.args)
            .field("registry", &self.registry)
            .field("sources", &self.sources.len())
            .finish()
    }
}

impl AppOptions {
    /// 以根目录创建，其余取默认值
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            config: ConfigStore::new(),
            args: ProcessArgs::new(),
            registry: ModuleRegistry::new(),
            sources: Vec::new(),
        }
    }

    /// 从当前进程读取：工作目录、命令行参数、环境变量与根目录下的配置文件
    pub fn from_env() -> Self {
        let args = ProcessArgs::from_env();
        let root_dir = args
            .root_dir()
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));
        let config_path = args
            .get("config")
            .map(PathBuf::from)
            .unwrap_or_else(|| root_dir.join(DEFAULT_CONFIG_FILE));
        let config = ConfigStore::load_sync(&config_path).unwrap_or_else(|e| {
            tracing::warn!(path = %config_path.display(), error = %e, "配置文件读取失败，使用空配置");
            ConfigStore::new()
        });

        Self::new(root_dir).with_args(args).with_config(config)
    }

    /// 设置配置文档
    pub fn with_config(mut self, config: ConfigStore) -> Self {
        self.config = config;
        self
    }

    /// 设置进程参数
    pub fn with_args(mut self, args: ProcessArgs) -> Self {
        self.args = args;
        self
    }

    /// 设置模块工厂
    pub fn with_registry(mut self, registry: ModuleRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// 追加描述来源
    pub fn with_source(mut self, source: Arc<dyn ManifestSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// 生效的根目录：参数 `root-dir` 优先，其次是配置中的 `root_dir`
    pub fn effective_root_dir(&self, core: &CoreConfig) -> PathBuf {
        self.args
            .root_dir()
            .or_else(|| core.root_dir.clone())
            .unwrap_or_else(|| self.root_dir.clone())
    }

    /// 只构建加载器，不启动引导
    ///
    /// 用于只需要发现与排序的场景，例如列出模块。
    pub fn build_loader(&self) -> Result<Arc<DependencyGraphLoader>> {
        let core = CoreConfig::from_store(&self.config)?;
        Ok(self.loader_for(&core, &self.effective_root_dir(&core)))
    }

    fn loader_for(&self, core: &CoreConfig, root_dir: &Path) -> Arc<DependencyGraphLoader> {
        let mut sources: Vec<Arc<dyn ManifestSource>> = vec![Arc::new(FsManifestSource::new(
            core.resolve_module_dirs(root_dir),
        ))];
        let mut registry = self.registry.clone();
        if core.modules.builtins {
            sources.push(Arc::new(StaticManifests::new(builtin::manifests(root_dir))));
            builtin::register(&mut registry, Arc::new(self.config.clone()));
        }
        sources.extend(self.sources.iter().cloned());

        let namespace = ManifestReader::read_root_sync(root_dir)
            .ok()
            .flatten()
            .map(|m| m.name)
            .unwrap_or_else(|| ROOT_MODULE_NAME.to_string());

        DependencyGraphLoader::new(
            LoaderOptions {
                namespace,
                root_dir: root_dir.to_path_buf(),
                name_prefix: core.modules.name_prefix.clone(),
                args: self.args.clone(),
            },
            sources,
            registry,
        )
    }
}

// ============================================================================
// 根模块
// ============================================================================

/// 根模块：运行加载器并汇总结果
struct Boot {
    loader: Arc<DependencyGraphLoader>,
    /// 构造阶段发现的错误，推迟到初始化时报告
    preflight: Mutex<Option<CoreError>>,
    report: Arc<OnceLock<LoadReport>>,
}

#[async_trait]
impl Module for Boot {
    async fn init(&self, _ctx: &ModuleContext) -> Result<()> {
        let preflight = match self.preflight.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(error) = preflight {
            self.loader.abort(&error).await;
            return Err(error);
        }

        let report = self.loader.load().await?;
        if !report.failed.is_empty() {
            let count = report.failed.len();
            self.loader.log(
                LogLevel::Warn,
                format!(
                    "{} module{} failed to load: {}. See above for details",
                    count,
                    if count == 1 { "" } else { "s" },
                    report.failed_names().join(", ")
                ),
            );
        }
        let _ = self.report.set(report.clone());
        report.into_result().map(|_| ())
    }
}

// ============================================================================
// 应用
// ============================================================================

struct AppInner {
    root: Arc<ModuleUnit>,
    loader: Arc<DependencyGraphLoader>,
    config: CoreConfig,
    report: Arc<OnceLock<LoadReport>>,
}

/// 应用
#[derive(Clone)]
pub struct Application {
    inner: Arc<AppInner>,
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

impl Application {
    /// 全局实例，第一次调用时以 [`AppOptions::from_env`] 构造
    ///
    /// 必须在 tokio 运行时中调用。
    pub fn instance() -> &'static Application {
        INSTANCE.get_or_init(|| Application::new(AppOptions::from_env()))
    }

    /// 创建应用并开始引导
    ///
    /// 立即返回；引导结果通过 [`Application::on_ready`] 获取。必须在 tokio
    /// 运行时中调用。
    pub fn new(options: AppOptions) -> Self {
        let mut preflight = None;

        let config = CoreConfig::from_store(&options.config).unwrap_or_else(|e| {
            preflight = Some(e);
            CoreConfig::default()
        });
        let root_dir = options.effective_root_dir(&config);

        let manifest = match ManifestReader::read_root_sync(&root_dir) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => ModuleManifest::new(ROOT_MODULE_NAME, &root_dir),
            Err(e) => {
                preflight.get_or_insert(e);
                ModuleManifest::new(ROOT_MODULE_NAME, &root_dir)
            }
        };

        let loader = options.loader_for(&config, &root_dir);
        let report = Arc::new(OnceLock::new());
        let boot = Boot {
            loader: Arc::clone(&loader),
            preflight: Mutex::new(preflight),
            report: Arc::clone(&report),
        };

        tracing::info!(root_dir = %root_dir.display(), name = %manifest.name, "开始引导");
        let root = ModuleUnit::spawn(&loader, Arc::new(manifest), Ok(ModuleHandle::new(boot)));

        Self {
            inner: Arc::new(AppInner {
                root,
                loader,
                config,
                report,
            }),
        }
    }

    /// 应用名称
    pub fn name(&self) -> &str {
        self.inner.root.name()
    }

    /// 应用根目录
    pub fn root_dir(&self) -> &Path {
        self.inner.loader.root_dir()
    }

    /// 内核配置
    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    /// 根模块单元
    pub fn unit(&self) -> &Arc<ModuleUnit> {
        &self.inner.root
    }

    /// 依赖图加载器
    pub fn loader(&self) -> &Arc<DependencyGraphLoader> {
        &self.inner.loader
    }

    /// 当前状态
    pub fn state(&self) -> UnitState {
        self.inner.root.state()
    }

    /// 加载报告，加载结束前为 `None`
    pub fn report(&self) -> Option<&LoadReport> {
        self.inner.report.get()
    }

    /// 进程退出码：就绪为 0，失败为 1，引导中为 `None`
    pub fn exit_code(&self) -> Option<i32> {
        match self.state() {
            UnitState::Initializing => None,
            UnitState::Ready => Some(0),
            UnitState::Failed => Some(1),
        }
    }

    /// 等待引导结束
    pub async fn on_ready(&self) -> Result<Arc<ModuleUnit>> {
        self.inner.root.on_ready().await
    }

    /// 等待模块就绪
    pub async fn wait_for_module(&self, name: &str) -> Result<Arc<ModuleUnit>> {
        self.inner.loader.wait_for_module(name).await
    }

    /// 并发等待多个模块，结果与参数顺序一致
    pub async fn wait_for_modules(&self, names: &[&str]) -> Result<Vec<Arc<ModuleUnit>>> {
        try_join_all(names.iter().map(|name| self.wait_for_module(name))).await
    }

    /// 全部模块描述
    pub async fn dependencies(&self) -> BTreeMap<String, Arc<ModuleManifest>> {
        self.inner.loader.configs().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    #[derive(Default)]
    struct Plain;
    impl Module for Plain {}

    fn write_module(root: &Path, name: &str, yaml: &str) {
        let dir = root.join("modules").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("module.yaml"), yaml).unwrap();
    }

    fn options(root: &TempDir) -> AppOptions {
        let mut registry = ModuleRegistry::new();
        registry.set_fallback(|_| Ok(ModuleHandle::new(Plain)));
        AppOptions::new(root.path())
            .with_registry(registry)
            .with_config(ConfigStore::from_value(json!({ "modules": { "builtins": false } })))
    }

    #[tokio::test]
    async fn test_boot_succeeds() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "db", "name: db\n");
        write_module(root.path(), "api", "name: api\ndependencies:\n  db: '*'\n");

        let app = Application::new(options(&root));
        assert_eq!(app.exit_code(), None);

        app.on_ready().await.unwrap();
        assert_eq!(app.exit_code(), Some(0));
        assert_eq!(app.name(), ROOT_MODULE_NAME);
        assert_eq!(app.report().unwrap().order, vec!["db", "api"]);

        let deps = app.dependencies().await;
        assert_eq!(deps.keys().cloned().collect::<Vec<_>>(), vec!["api", "db"]);
    }

    #[tokio::test]
    async fn test_root_manifest_names_application() {
        let root = TempDir::new().unwrap();
        fs::write(
            root.path().join("package.json"),
            r#"{ "name": "my-app", "version": "2.1.0" }"#,
        )
        .unwrap();

        let app = Application::new(options(&root));
        app.on_ready().await.unwrap();
        assert_eq!(app.name(), "my-app");
        assert_eq!(app.unit().manifest().version, "2.1.0");
    }

    #[tokio::test]
    async fn test_failure_sets_exit_code() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "db", "name: db\n");

        let mut registry = ModuleRegistry::new();
        registry.register("db", |_| Err(CoreError::InitFailed("no socket".into())));
        let app = Application::new(options(&root).with_registry(registry));

        let err = app.on_ready().await.unwrap_err();
        assert!(err.to_string().contains("db"));
        assert_eq!(app.exit_code(), Some(1));
        assert_eq!(app.report().unwrap().failed_names(), vec!["db"]);
    }

    #[tokio::test]
    async fn test_root_dir_argument_wins() {
        let configured = TempDir::new().unwrap();
        let overridden = TempDir::new().unwrap();
        write_module(overridden.path(), "only-here", "name: only-here\n");

        let mut args = ProcessArgs::new();
        args.set("root-dir", overridden.path().display().to_string());
        let app = Application::new(options(&configured).with_args(args));

        app.on_ready().await.unwrap();
        assert_eq!(app.root_dir(), overridden.path());
        assert!(app.dependencies().await.contains_key("only-here"));
    }

    #[tokio::test]
    async fn test_invalid_root_manifest_fails_boot() {
        let root = TempDir::new().unwrap();
        fs::write(root.path().join("package.json"), "{ not json").unwrap();

        let app = Application::new(options(&root));
        assert!(app.on_ready().await.is_err());
        assert_eq!(app.exit_code(), Some(1));
    }

    #[tokio::test]
    async fn test_waiters_return_after_preflight_failure() {
        let root = TempDir::new().unwrap();
        write_module(root.path(), "a", "name: a\n");
        fs::write(root.path().join("package.json"), "{ not json").unwrap();

        let app = Application::new(options(&root));
        assert!(app.on_ready().await.is_err());

        for name in ["missing-name", "a"] {
            let waited =
                tokio::time::timeout(std::time::Duration::from_secs(2), app.wait_for_module(name))
                    .await
                    .expect("等待者不应挂起");
            assert!(waited.is_err());
        }
        assert!(app.loader().on_ready().await.is_err());
    }

    #[tokio::test]
    async fn test_invalid_core_config_releases_waiters() {
        let root = TempDir::new().unwrap();
        let options = options(&root)
            .with_config(ConfigStore::from_value(json!({ "modules": { "builtins": "maybe" } })));

        let app = Application::new(options);
        assert!(app.on_ready().await.is_err());

        let waited =
            tokio::time::timeout(std::time::Duration::from_secs(2), app.wait_for_modules(&["x"]))
                .await
                .expect("等待者不应挂起");
        assert!(waited.is_err());
    }
}
