//! 依赖图加载器
//!
//! 负责一次引导中的全部模块：
//!
//! 1. 从各个描述来源发现模块并检查重名
//! 2. 触发描述加载钩子，允许观察者修改描述集合
//! 3. 计算加载顺序（依赖在前，同层按名称排序）
//! 4. 逐个构造模块并等待其就绪，失败的模块记录下来后继续加载其余模块
//! 5. 检查每个能力标签都有已就绪的提供者
//!
//! 发现失败、重名、循环依赖以及描述钩子失败会中止加载；单个模块失败不会。

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::error::Error as StdError;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use crate::core::args::ProcessArgs;
use crate::core::services::{LogLevel, Services};
use crate::hook::{Hook, MutableHook};
use crate::module::capability::CapabilityTable;
use crate::module::dependency::DependencyGraph;
use crate::module::manifest::ModuleManifest;
use crate::module::parser::ManifestSource;
use crate::module::ready::ReadySignal;
use crate::module::registry::ModuleRegistry;
use crate::module::unit::ModuleUnit;
use crate::utils::{CoreError, Result};

/// 描述加载钩子名
pub const CONFIGS_LOADED: &str = "configsloaded";

/// 模块加载钩子名
pub const MODULE_LOADED: &str = "moduleloaded";

// ============================================================================
// 事件与报告
// ============================================================================

/// 模块加载钩子的事件参数
#[derive(Debug, Clone)]
pub struct ModuleLoaded {
    /// 模块单元
    pub unit: Arc<ModuleUnit>,
    /// 模块失败时的错误
    pub error: Option<Arc<CoreError>>,
}

impl ModuleLoaded {
    /// 创建事件
    pub fn new(unit: Arc<ModuleUnit>, error: Option<Arc<CoreError>>) -> Self {
        Self { unit, error }
    }

    /// 模块名称
    pub fn name(&self) -> &str {
        self.unit.name()
    }

    /// 模块是否就绪
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// 失败模块
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedModule {
    /// 模块名称
    pub name: String,
    /// 错误描述
    pub error: String,
}

/// 加载报告
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadReport {
    /// 加载顺序
    pub order: Vec<String>,
    /// 已就绪的模块
    pub loaded: Vec<String>,
    /// 失败的模块，按加载顺序
    pub failed: Vec<FailedModule>,
    /// 没有就绪提供者的能力标签
    pub missing_capabilities: Vec<String>,
    /// 总耗时（毫秒）
    pub elapsed_ms: u64,
}

impl LoadReport {
    /// 没有失败模块且没有缺失能力
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.missing_capabilities.is_empty()
    }

    /// 失败模块名称
    pub fn failed_names(&self) -> Vec<String> {
        self.failed.iter().map(|f| f.name.clone()).collect()
    }

    /// 转为结果
    ///
    /// 存在失败模块时返回 [`CoreError::BootFailed`]；模块全部就绪但能力缺失时
    /// 返回 [`CoreError::MissingCapability`]。
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else if self.failed.is_empty() {
            Err(CoreError::MissingCapability(self.missing_capabilities))
        } else {
            Err(CoreError::BootFailed {
                failed: self.failed_names(),
                missing_capabilities: self.missing_capabilities,
            })
        }
    }
}

// ============================================================================
// 加载器
// ============================================================================

/// 加载器选项
#[derive(Debug, Clone, Default)]
pub struct LoaderOptions {
    /// 配置命名空间，通常为应用名称
    pub namespace: String,
    /// 应用根目录
    pub root_dir: std::path::PathBuf,
    /// 模块名称前缀，按简短名称查询模块时自动补全
    pub name_prefix: Option<String>,
    /// 进程参数
    pub args: ProcessArgs,
}

#[derive(Default)]
struct LoaderState {
    configs: BTreeMap<String, Arc<ModuleManifest>>,
    instances: BTreeMap<String, Arc<ModuleUnit>>,
    slots: HashMap<String, ReadySignal<Arc<ModuleUnit>>>,
    order: Vec<String>,
    failed_modules: Vec<String>,
    /// 被依赖的模块 -> 声明同级依赖的模块
    peer_dependencies: BTreeMap<String, BTreeSet<String>>,
    graph: DependencyGraph,
}

impl LoaderState {
    fn resolve(&self, name: &str, prefix: Option<&str>) -> Option<String> {
        if self.configs.contains_key(name) {
            return Some(name.to_string());
        }
        let prefixed = format!("{}{}", prefix?, name);
        self.configs.contains_key(&prefixed).then_some(prefixed)
    }
}

/// 依赖图加载器
pub struct DependencyGraphLoader {
    options: LoaderOptions,
    sources: Vec<Arc<dyn ManifestSource>>,
    registry: ModuleRegistry,
    state: RwLock<LoaderState>,
    configs_loaded: MutableHook<BTreeMap<String, ModuleManifest>>,
    module_loaded: Arc<Hook<ModuleLoaded>>,
    services: Arc<Services>,
    /// 描述集合确定后完成
    configs_ready: ReadySignal<()>,
    /// 加载结束后完成
    signal: ReadySignal<()>,
    started: AtomicBool,
}

impl std::fmt::Debug for DependencyGraphLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DependencyGraphLoader")
            .field("options", &self.options)
            .field("sources", &self.sources.iter().map(|s| s.describe()).collect::<Vec<_>>())
            .field("registry", &self.registry)
            .finish()
    }
}

impl DependencyGraphLoader {
    /// 创建加载器
    ///
    /// # Arguments
    ///
    /// * `options` - 命名空间、根目录、名称前缀与进程参数
    /// * `sources` - 描述来源，按顺序发现
    /// * `registry` - 模块工厂
    pub fn new(
        options: LoaderOptions,
        sources: Vec<Arc<dyn ManifestSource>>,
        registry: ModuleRegistry,
    ) -> Arc<Self> {
        let module_loaded = Arc::new(Hook::concurrent(MODULE_LOADED));
        Arc::new(Self {
            options,
            sources,
            registry,
            state: RwLock::new(LoaderState::default()),
            configs_loaded: MutableHook::new(CONFIGS_LOADED),
            services: Arc::new(Services::new(Arc::clone(&module_loaded))),
            module_loaded,
            configs_ready: ReadySignal::new(),
            signal: ReadySignal::new(),
            started: AtomicBool::new(false),
        })
    }

    // ==================== 访问器 ====================

    /// 加载器选项
    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    /// 应用根目录
    pub fn root_dir(&self) -> &Path {
        &self.options.root_dir
    }

    /// 进程参数
    pub fn args(&self) -> &ProcessArgs {
        &self.options.args
    }

    /// 模块名称前缀
    pub fn name_prefix(&self) -> Option<&str> {
        self.options.name_prefix.as_deref()
    }

    /// 协作服务
    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// 描述加载钩子
    ///
    /// 发现结束后、计算顺序之前调用一次，观察者可以增删或修改描述。
    pub fn configs_loaded_hook(&self) -> &MutableHook<BTreeMap<String, ModuleManifest>> {
        &self.configs_loaded
    }

    /// 模块加载钩子，每个模块进入终态后调用一次
    pub fn module_loaded_hook(&self) -> &Arc<Hook<ModuleLoaded>> {
        &self.module_loaded
    }

    /// 全部模块描述
    pub async fn configs(&self) -> BTreeMap<String, Arc<ModuleManifest>> {
        self.state.read().await.configs.clone()
    }

    /// 查询模块描述，支持省略名称前缀
    pub async fn manifest(&self, name: &str) -> Option<Arc<ModuleManifest>> {
        let state = self.state.read().await;
        let resolved = state.resolve(name, self.name_prefix())?;
        state.configs.get(&resolved).cloned()
    }

    /// 已创建的模块单元
    pub async fn instance(&self, name: &str) -> Option<Arc<ModuleUnit>> {
        let state = self.state.read().await;
        let resolved = state.resolve(name, self.name_prefix())?;
        state.instances.get(&resolved).cloned()
    }

    /// 全部已创建的模块单元
    pub async fn instances(&self) -> BTreeMap<String, Arc<ModuleUnit>> {
        self.state.read().await.instances.clone()
    }

    /// 加载顺序
    pub async fn order(&self) -> Vec<String> {
        self.state.read().await.order.clone()
    }

    /// 失败模块，按加载顺序
    pub async fn failed_modules(&self) -> Vec<String> {
        self.state.read().await.failed_modules.clone()
    }

    /// 同级依赖：被依赖的模块 -> 声明者
    pub async fn peer_dependencies(&self) -> BTreeMap<String, BTreeSet<String>> {
        self.state.read().await.peer_dependencies.clone()
    }

    /// 依赖图
    pub async fn dependency_graph(&self) -> DependencyGraph {
        self.state.read().await.graph.clone()
    }

    /// 读取加载器命名空间下的配置
    pub fn get_config(&self, key: &str) -> Option<Value> {
        if self.options.namespace.is_empty() {
            self.services.get_config(key)
        } else {
            self.services
                .get_config(&format!("{}.{}", self.options.namespace, key))
        }
    }

    /// 写一条加载器日志
    pub fn log(&self, level: LogLevel, message: impl AsRef<str>) {
        self.services
            .log_now(level, self.log_source(), message.as_ref());
    }

    /// 写一条错误日志，包含完整的错误链
    pub fn log_error(&self, context: &str, error: &CoreError) {
        self.log(LogLevel::Error, format!("{}: {}", context, error_chain(error)));
    }

    fn log_source(&self) -> &str {
        if self.options.namespace.is_empty() {
            "loader"
        } else {
            &self.options.namespace
        }
    }

    // ==================== 发现与排序 ====================

    /// 发现模块
    ///
    /// 依次读取每个描述来源；任意两个描述同名即失败。返回的描述已剔除
    /// 指向集合外的依赖，按名称排序。
    pub async fn discover(&self) -> Result<Vec<ModuleManifest>> {
        Ok(self.discover_map().await?.into_values().collect())
    }

    async fn discover_map(&self) -> Result<BTreeMap<String, ModuleManifest>> {
        let mut found: BTreeMap<String, ModuleManifest> = BTreeMap::new();

        for source in &self.sources {
            let manifests = source.manifests().await?;
            debug!(source = %source.describe(), count = manifests.len(), "读取模块描述");

            for manifest in manifests {
                if let Some(existing) = found.get(&manifest.name) {
                    return Err(CoreError::DuplicateModule {
                        name: manifest.name.clone(),
                        first: existing.root_dir.clone(),
                        second: manifest.root_dir.clone(),
                    });
                }
                found.insert(manifest.name.clone(), manifest);
            }
        }

        retain_known_dependencies(&mut found);
        Ok(found)
    }

    /// 计算加载顺序
    ///
    /// 依赖总在依赖方之前，同时可加载的模块按名称排序；存在循环时返回
    /// [`CoreError::CircularDependency`]。
    pub fn compute_order<'a, I>(manifests: I) -> Result<Vec<String>>
    where
        I: IntoIterator<Item = &'a ModuleManifest>,
    {
        DependencyGraph::from_manifests(manifests).topological_sort()
    }

    // ==================== 加载 ====================

    /// 加载全部模块
    ///
    /// 只能调用一次。单个模块失败不会中止加载，失败情况见返回的 [`LoadReport`]。
    #[instrument(skip(self), fields(namespace = %self.options.namespace))]
    pub async fn load(self: &Arc<Self>) -> Result<LoadReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(CoreError::InitFailed("加载器只能启动一次".to_string()));
        }

        match self.run().await {
            Ok(report) => {
                self.signal.complete(Ok(()));
                Ok(report)
            }
            Err(e) => {
                self.abort(&e).await;
                Err(e)
            }
        }
    }

    /// 以致命错误结束加载
    ///
    /// 所有等待者（包括尚未发现的名称）都会得到错误。之后不能再调用 `load`。
    pub(crate) async fn abort(&self, error: &CoreError) {
        self.started.store(true, Ordering::SeqCst);
        self.log_error("模块加载中止", error);

        let shared = Arc::new(CoreError::InitFailed(format!("模块加载中止: {}", error)));
        self.configs_ready.complete(Err(Arc::clone(&shared)));
        for slot in self.state.read().await.slots.values() {
            slot.complete(Err(Arc::clone(&shared)));
        }
        self.signal.complete(Err(shared));
    }

    async fn run(self: &Arc<Self>) -> Result<LoadReport> {
        let started = Instant::now();

        let mut found = self.discover_map().await?;
        self.log(LogLevel::Debug, format!("发现 {} 个模块", found.len()));

        self.configs_loaded.invoke(&mut found).await?;

        // 观察者可能增删模块或修改依赖
        let mut configs: BTreeMap<String, ModuleManifest> = found
            .into_values()
            .map(|manifest| (manifest.name.clone(), manifest))
            .collect();
        retain_known_dependencies(&mut configs);

        let peer_dependencies = self.collect_peer_dependencies(&configs);
        let graph = DependencyGraph::from_manifests(configs.values());
        let order = graph.topological_sort()?;

        {
            let mut state = self.state.write().await;
            state.slots = configs
                .keys()
                .map(|name| (name.clone(), ReadySignal::new()))
                .collect();
            state.configs = configs
                .into_iter()
                .map(|(name, manifest)| (name, Arc::new(manifest)))
                .collect();
            state.order = order.clone();
            state.peer_dependencies = peer_dependencies;
            state.graph = graph.clone();
        }
        self.configs_ready.complete(Ok(()));
        debug!(order = ?order, "加载顺序已确定");

        let total = order.len();
        let mut report = LoadReport {
            order: order.clone(),
            ..LoadReport::default()
        };

        for (index, name) in order.iter().enumerate() {
            let (manifest, slot) = {
                let state = self.state.read().await;
                (state.configs.get(name).cloned(), state.slots.get(name).cloned())
            };
            let Some(manifest) = manifest else {
                continue;
            };

            let handle = self.registry.create(&manifest);
            let unit = ModuleUnit::spawn(self, manifest, handle);
            self.state
                .write()
                .await
                .instances
                .insert(name.clone(), Arc::clone(&unit));
            if let Some(slot) = slot {
                slot.complete(Ok(Arc::clone(&unit)));
            }

            let error = match unit.on_ready().await {
                Ok(_) => {
                    report.loaded.push(name.clone());
                    None
                }
                Err(e) => {
                    self.log_error(&format!("模块 '{}' 加载失败", name), &e);
                    let dependents = graph.get_all_dependents(name);
                    if !dependents.is_empty() {
                        self.log(
                            LogLevel::Warn,
                            format!(
                                "以下模块依赖 '{}'，可能无法正常工作: {}",
                                name,
                                dependents.join(", ")
                            ),
                        );
                    }
                    self.state.write().await.failed_modules.push(name.clone());
                    report.failed.push(FailedModule {
                        name: name.clone(),
                        error: unit
                            .error()
                            .map(|cause| cause.to_string())
                            .unwrap_or_else(|| e.to_string()),
                    });
                    unit.error()
                }
            };

            let event = ModuleLoaded::new(Arc::clone(&unit), error);
            if let Err(e) = self.module_loaded.invoke(event).await {
                self.log(LogLevel::Warn, format!("模块加载钩子执行失败: {}", e));
            }

            self.log(
                LogLevel::Debug,
                format!("[{}/{}] {} {}", index + 1, total, name, unit.state()),
            );
        }

        report.missing_capabilities = self.check_capabilities().await;
        report.elapsed_ms = started.elapsed().as_millis() as u64;

        info!(
            loaded = report.loaded.len(),
            failed = report.failed.len(),
            missing = report.missing_capabilities.len(),
            elapsed_ms = report.elapsed_ms,
            "模块加载完成"
        );

        Ok(report)
    }

    fn collect_peer_dependencies(
        &self,
        configs: &BTreeMap<String, ModuleManifest>,
    ) -> BTreeMap<String, BTreeSet<String>> {
        let mut peers: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        for manifest in configs.values() {
            for peer in &manifest.peer_dependencies {
                if !configs.contains_key(peer) {
                    self.log(
                        LogLevel::Warn,
                        format!("模块 '{}' 声明的同级依赖 '{}' 不存在", manifest.name, peer),
                    );
                }
                peers
                    .entry(peer.clone())
                    .or_default()
                    .insert(manifest.name.clone());
            }
        }
        peers
    }

    async fn check_capabilities(&self) -> Vec<String> {
        let state = self.state.read().await;
        let table = CapabilityTable::from_manifests(state.configs.values().map(|m| m.as_ref()));
        let missing = table.missing(|name| {
            state
                .instances
                .get(name)
                .map(|unit| unit.is_ready())
                .unwrap_or(false)
        });

        for tag in &missing {
            self.log(
                LogLevel::Error,
                format!(
                    "没有已就绪的模块提供 '{}' 能力 (提供者: {})",
                    tag,
                    table.providers(tag).join(", ")
                ),
            );
        }
        missing
    }

    // ==================== 等待 ====================

    /// 等待加载结束
    pub async fn on_ready(&self) -> Result<()> {
        self.signal
            .wait()
            .await
            .map_err(|source| CoreError::ModuleInitFailed {
                module: self.log_source().to_string(),
                source,
            })
    }

    /// 等待模块就绪
    ///
    /// 可以在模块被创建之前调用；名称可以省略前缀。模块不在描述集合中时
    /// 返回 [`CoreError::ModuleNotFound`]。
    pub async fn wait_for_module(&self, name: &str) -> Result<Arc<ModuleUnit>> {
        let aborted = |source| CoreError::ModuleInitFailed {
            module: name.to_string(),
            source,
        };

        self.configs_ready.wait().await.map_err(aborted)?;

        let slot = {
            let state = self.state.read().await;
            let resolved = state
                .resolve(name, self.name_prefix())
                .ok_or_else(|| CoreError::ModuleNotFound(name.to_string()))?;
            state
                .slots
                .get(&resolved)
                .cloned()
                .ok_or_else(|| CoreError::ModuleNotFound(name.to_string()))?
        };

        let unit = slot.wait().await.map_err(aborted)?;
        unit.on_ready().await
    }

    /// 等待多个模块就绪，结果与参数顺序一致，任一失败即返回错误
    pub async fn wait_for_modules(&self, names: &[&str]) -> Result<Vec<Arc<ModuleUnit>>> {
        try_join_all(names.iter().map(|name| self.wait_for_module(name))).await
    }
}

/// 剔除指向集合外的依赖
fn retain_known_dependencies(configs: &mut BTreeMap<String, ModuleManifest>) {
    let names: BTreeSet<String> = configs.keys().cloned().collect();
    for manifest in configs.values_mut() {
        manifest.retain_known_dependencies(|dep| names.contains(dep));
    }
}

/// 展开错误链
fn error_chain(error: &CoreError) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let text = cause.to_string();
        if !message.contains(&text) {
            message.push_str("\n  caused by: ");
            message.push_str(&text);
        }
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::context::ModuleContext;
    use crate::module::parser::StaticManifests;
    use crate::module::unit::{Module, ModuleHandle, UnitState};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Scripted {
        journal: Journal,
        fail: bool,
        waits_for: Option<String>,
    }

    #[async_trait]
    impl Module for Scripted {
        async fn init(&self, ctx: &ModuleContext) -> Result<()> {
            if let Some(other) = &self.waits_for {
                ctx.wait_for_module(other).await?;
            }
            self.journal.lock().unwrap().push(ctx.name().to_string());
            if self.fail {
                Err(CoreError::InitFailed(format!("{} exploded", ctx.name())))
            } else {
                Ok(())
            }
        }
    }

    fn registry(journal: &Journal, failing: &[&str]) -> ModuleRegistry {
        let journal = journal.clone();
        let failing: Vec<String> = failing.iter().map(|s| s.to_string()).collect();
        let mut registry = ModuleRegistry::new();
        registry.set_fallback(move |m| {
            Ok(ModuleHandle::new(Scripted {
                journal: journal.clone(),
                fail: failing.contains(&m.name),
                waits_for: m
                    .extra
                    .get("waitsFor")
                    .and_then(|v| v.as_str())
                    .map(String::from),
            }))
        });
        registry
    }

    fn loader(manifests: Vec<ModuleManifest>, registry: ModuleRegistry) -> Arc<DependencyGraphLoader> {
        DependencyGraphLoader::new(
            LoaderOptions {
                name_prefix: Some("chips-".to_string()),
                ..LoaderOptions::default()
            },
            vec![Arc::new(StaticManifests::new(manifests))],
            registry,
        )
    }

    fn chain() -> Vec<ModuleManifest> {
        vec![
            ModuleManifest::new("c", "/m/c").with_dependency("b"),
            ModuleManifest::new("b", "/m/b").with_dependency("a"),
            ModuleManifest::new("a", "/m/a").with_dependency("lodash"),
        ]
    }

    #[tokio::test]
    async fn test_load_in_dependency_order() {
        let journal = Journal::default();
        let loader = loader(chain(), registry(&journal, &[]));

        let report = loader.load().await.unwrap();
        assert_eq!(report.order, vec!["a", "b", "c"]);
        assert_eq!(report.loaded, vec!["a", "b", "c"]);
        assert!(report.is_success());
        assert_eq!(*journal.lock().unwrap(), vec!["a", "b", "c"]);

        // 集合外的依赖被剔除
        let a = loader.manifest("a").await.unwrap();
        assert!(a.dependencies.is_empty());
        assert!(loader.on_ready().await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_does_not_stop_other_modules() {
        let journal = Journal::default();
        let loader = loader(chain(), registry(&journal, &["b"]));

        let report = loader.load().await.unwrap();
        assert_eq!(report.loaded, vec!["a", "c"]);
        assert_eq!(report.failed_names(), vec!["b"]);
        assert!(report.failed[0].error.contains("b exploded"));
        assert_eq!(loader.failed_modules().await, vec!["b"]);
        assert_eq!(
            loader.instance("b").await.unwrap().state(),
            UnitState::Failed
        );

        let err = report.into_result().unwrap_err();
        assert!(matches!(err, CoreError::BootFailed { ref failed, .. } if failed == &["b"]));
    }

    #[tokio::test]
    async fn test_cycle_aborts_load() {
        let journal = Journal::default();
        let manifests = vec![
            ModuleManifest::new("x", "/m/x").with_dependency("y"),
            ModuleManifest::new("y", "/m/y").with_dependency("x"),
        ];
        let loader = loader(manifests, registry(&journal, &[]));

        let waiter = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.wait_for_module("x").await })
        };

        let err = loader.load().await.unwrap_err();
        assert!(matches!(err, CoreError::CircularDependency(_)));
        assert!(journal.lock().unwrap().is_empty());
        assert!(waiter.await.unwrap().is_err());
        assert!(loader.on_ready().await.is_err());
    }

    #[tokio::test]
    async fn test_duplicate_names_across_sources() {
        let journal = Journal::default();
        let loader = DependencyGraphLoader::new(
            LoaderOptions::default(),
            vec![
                Arc::new(StaticManifests::new(vec![ModuleManifest::new("db", "/one/db")])),
                Arc::new(StaticManifests::new(vec![ModuleManifest::new("db", "/two/db")])),
            ],
            registry(&journal, &[]),
        );

        let err = loader.load().await.unwrap_err();
        match err {
            CoreError::DuplicateModule { name, first, second } => {
                assert_eq!(name, "db");
                assert_eq!(first, Path::new("/one/db"));
                assert_eq!(second, Path::new("/two/db"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_wait_for_module_before_load_and_by_short_name() {
        let journal = Journal::default();
        let loader = loader(
            vec![ModuleManifest::new("chips-db", "/m/db")],
            registry(&journal, &[]),
        );

        let early = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.wait_for_module("db").await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        loader.load().await.unwrap();
        let unit = early.await.unwrap().unwrap();
        assert_eq!(unit.name(), "chips-db");

        let err = loader.wait_for_module("cache").await.unwrap_err();
        assert!(matches!(err, CoreError::ModuleNotFound(ref name) if name == "cache"));
    }

    #[tokio::test]
    async fn test_wait_for_modules_preserves_order() {
        let journal = Journal::default();
        let loader = loader(chain(), registry(&journal, &[]));
        loader.load().await.unwrap();

        let units = loader.wait_for_modules(&["c", "a"]).await.unwrap();
        let names: Vec<&str> = units.iter().map(|u| u.name()).collect();
        assert_eq!(names, vec!["c", "a"]);

        assert!(loader.wait_for_modules(&["a", "missing"]).await.is_err());
    }

    #[tokio::test]
    async fn test_module_can_wait_for_its_dependency() {
        let journal = Journal::default();
        let mut dependent = ModuleManifest::new("api", "/m/api").with_dependency("db");
        dependent
            .extra
            .insert("waitsFor".into(), Value::from("db"));
        let loader = loader(
            vec![dependent, ModuleManifest::new("db", "/m/db")],
            registry(&journal, &[]),
        );

        let report = loader.load().await.unwrap();
        assert_eq!(report.loaded, vec!["db", "api"]);
    }

    #[tokio::test]
    async fn test_configs_loaded_hook_can_rewrite_manifests() {
        let journal = Journal::default();
        let loader = loader(chain(), registry(&journal, &[]));

        loader.configs_loaded_hook().tap(|configs| {
            Box::pin(async move {
                configs.insert(
                    "z".to_string(),
                    ModuleManifest::new("z", "/m/z"),
                );
                if let Some(a) = configs.get_mut("a") {
                    a.dependencies.insert("z".to_string());
                }
                configs.remove("c");
                Ok(())
            })
        });

        let report = loader.load().await.unwrap();
        assert_eq!(report.order, vec!["z", "a", "b"]);
    }

    #[tokio::test]
    async fn test_configs_loaded_failure_is_fatal() {
        let journal = Journal::default();
        let loader = loader(chain(), registry(&journal, &[]));
        loader
            .configs_loaded_hook()
            .tap(|_| Box::pin(async { Err(CoreError::Internal("rejected".into())) }));

        let err = loader.load().await.unwrap_err();
        assert!(matches!(err, CoreError::Hook { .. }));
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_module_loaded_hook_sees_every_module() {
        let journal = Journal::default();
        let loader = loader(chain(), registry(&journal, &["a"]));
        let seen = Journal::default();

        let recorder = seen.clone();
        loader.module_loaded_hook().tap(move |event: ModuleLoaded| {
            recorder
                .lock()
                .unwrap()
                .push(format!("{}:{}", event.name(), event.is_ok()));
            async { Ok(()) }
        });

        loader.load().await.unwrap();
        assert_eq!(*seen.lock().unwrap(), vec!["a:false", "b:true", "c:true"]);
    }

    #[tokio::test]
    async fn test_missing_capability_is_reported() {
        let journal = Journal::default();
        let manifests = vec![
            ModuleManifest::new("file-log", "/m/l").with_essential_type("logger"),
            ModuleManifest::new("yaml-config", "/m/c").with_essential_type("config"),
        ];
        let loader = loader(manifests, registry(&journal, &["file-log"]));

        let report = loader.load().await.unwrap();
        assert_eq!(report.missing_capabilities, vec!["logger"]);
        assert!(!report.is_success());
    }

    #[tokio::test]
    async fn test_only_missing_capability_result() {
        let manifests = vec![ModuleManifest::new("file-log", "/m/l").with_essential_type("logger")];
        let loader = loader(manifests, ModuleRegistry::new());

        // 工厂缺失，模块失败：仍然是引导失败
        let report = loader.load().await.unwrap();
        assert!(matches!(
            report.clone().into_result().unwrap_err(),
            CoreError::BootFailed { ref failed, .. } if failed == &["file-log"]
        ));

        let capability_only = LoadReport {
            missing_capabilities: vec!["logger".to_string()],
            ..LoadReport::default()
        };
        assert!(matches!(
            capability_only.into_result().unwrap_err(),
            CoreError::MissingCapability(ref tags) if tags == &["logger"]
        ));
    }

    #[tokio::test]
    async fn test_abort_releases_every_waiter() {
        let journal = Journal::default();
        let loader = loader(chain(), registry(&journal, &[]));

        let known = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.wait_for_module("a").await })
        };
        let unknown = {
            let loader = loader.clone();
            tokio::spawn(async move { loader.wait_for_module("missing-name").await })
        };

        loader
            .abort(&CoreError::InitFailed("root manifest unreadable".into()))
            .await;

        let known = tokio::time::timeout(Duration::from_secs(2), known).await.unwrap();
        let unknown = tokio::time::timeout(Duration::from_secs(2), unknown).await.unwrap();
        assert!(known.unwrap().is_err());
        assert!(unknown.unwrap().is_err());
        assert!(loader.on_ready().await.is_err());

        // 中止后不再加载
        assert!(loader.load().await.is_err());
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_factory_fails_module() {
        let manifests = vec![ModuleManifest::new("orphan", "/m/o")];
        let loader = loader(manifests, ModuleRegistry::new());

        let report = loader.load().await.unwrap();
        assert_eq!(report.failed_names(), vec!["orphan"]);
        assert!(report.failed[0].error.contains("orphan"));
    }

    #[tokio::test]
    async fn test_peer_dependencies_are_recorded() {
        let journal = Journal::default();
        let manifests = vec![
            ModuleManifest::new("api", "/m/api").with_peer_dependency("auth"),
            ModuleManifest::new("web", "/m/web").with_peer_dependency("auth"),
        ];
        let loader = loader(manifests, registry(&journal, &[]));
        loader.load().await.unwrap();

        let peers = loader.peer_dependencies().await;
        assert_eq!(
            peers["auth"].iter().cloned().collect::<Vec<_>>(),
            vec!["api", "web"]
        );
    }

    #[tokio::test]
    async fn test_load_runs_once() {
        let journal = Journal::default();
        let loader = loader(chain(), registry(&journal, &[]));
        loader.load().await.unwrap();
        assert!(loader.load().await.is_err());
        assert_eq!(journal.lock().unwrap().len(), 3);
    }

    #[test]
    fn test_error_chain_includes_causes() {
        let error = CoreError::ModuleInitFailed {
            module: "db".into(),
            source: Arc::new(CoreError::InitFailed("socket closed".into())),
        };
        let text = error_chain(&error);
        assert!(text.contains("db"));
        assert!(text.contains("socket closed"));
    }
}
