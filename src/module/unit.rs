//! 模块单元
//!
//! [`ModuleUnit`] 包装一个模块实例及其生命周期：
//!
//! ```text
//! Initializing ──init 成功──▶ Ready
//!      │
//!      └──init 失败 / panic──▶ Failed
//! ```
//!
//! 终态只会进入一次。单元创建时即在 tokio 任务中启动初始化，创建方不会被阻塞；
//! 初始化返回的错误与 panic 都会被捕获并转为 `Failed`。

use std::any::Any;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{trace, warn};

use crate::core::services::{LogLevel, Services};
use crate::hook::Hook;
use crate::module::context::ModuleContext;
use crate::module::loader::DependencyGraphLoader;
use crate::module::manifest::ModuleManifest;
use crate::module::ready::ReadySignal;
use crate::utils::{CoreError, Result};

/// 模块就绪事件名
pub const MODULE_READY: &str = "ready";

// ============================================================================
// 模块接口
// ============================================================================

/// 模块实现
///
/// `init` 在单元创建后运行一次，返回 `Ok` 即进入就绪状态。
#[async_trait]
pub trait Module: Send + Sync + 'static {
    /// 初始化
    async fn init(&self, ctx: &ModuleContext) -> Result<()> {
        let _ = ctx;
        Ok(())
    }
}

/// 类型擦除的模块实例
///
/// 同时保留 `dyn Module` 与 `dyn Any` 两个视图，后者用于取回具体类型。
#[derive(Clone)]
pub struct ModuleHandle {
    module: Arc<dyn Module>,
    any: Arc<dyn Any + Send + Sync>,
}

impl ModuleHandle {
    /// 包装模块实例
    pub fn new<M: Module>(module: M) -> Self {
        let module = Arc::new(module);
        Self {
            module: module.clone(),
            any: module,
        }
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ModuleHandle")
    }
}

// ============================================================================
// 状态与事件
// ============================================================================

/// 模块单元状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitState {
    /// 初始化中
    Initializing,
    /// 已就绪
    Ready,
    /// 初始化失败
    Failed,
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitState::Initializing => write!(f, "initializing"),
            UnitState::Ready => write!(f, "ready"),
            UnitState::Failed => write!(f, "failed"),
        }
    }
}

/// 就绪钩子的事件参数
#[derive(Debug, Clone)]
pub struct ReadyEvent {
    /// 模块名称
    pub name: String,
    /// 失败时的错误
    pub error: Option<Arc<CoreError>>,
}

// ============================================================================
// 模块单元
// ============================================================================

/// 模块单元
pub struct ModuleUnit {
    name: String,
    log_source: String,
    manifest: Arc<ModuleManifest>,
    module: Option<ModuleHandle>,
    signal: ReadySignal<()>,
    ready_hook: Hook<ReadyEvent>,
    started: Instant,
    started_at: DateTime<Utc>,
    init_duration: OnceLock<Duration>,
    services: Arc<Services>,
}

impl fmt::Debug for ModuleUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleUnit")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("init_duration", &self.init_duration())
            .finish()
    }
}

impl ModuleUnit {
    /// 创建单元并启动初始化
    ///
    /// `module` 为 `Err` 时（例如没有注册工厂）单元直接进入失败状态。
    pub fn spawn(
        loader: &Arc<DependencyGraphLoader>,
        manifest: Arc<ModuleManifest>,
        module: Result<ModuleHandle>,
    ) -> Arc<Self> {
        let (handle, construct_error) = match module {
            Ok(handle) => (Some(handle), None),
            Err(e) => (None, Some(e)),
        };

        let unit = Arc::new(Self {
            name: manifest.name.clone(),
            log_source: manifest.short_name(loader.name_prefix()).to_string(),
            manifest,
            module: handle.clone(),
            signal: ReadySignal::new(),
            ready_hook: Hook::concurrent(MODULE_READY),
            started: Instant::now(),
            started_at: Utc::now(),
            init_duration: OnceLock::new(),
            services: Arc::clone(loader.services()),
        });

        let ctx = ModuleContext::new(Arc::clone(loader), Arc::clone(&unit));
        let task_unit = Arc::clone(&unit);
        tokio::spawn(async move {
            let error = match (handle, construct_error) {
                (_, Some(e)) => Some(e),
                (Some(handle), None) => run_init(task_unit.name.clone(), handle, ctx).await.err(),
                (None, None) => None,
            };
            task_unit.set_ready(error).await;
        });

        unit
    }

    /// 模块名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 模块描述
    pub fn manifest(&self) -> &Arc<ModuleManifest> {
        &self.manifest
    }

    /// 当前状态
    pub fn state(&self) -> UnitState {
        match self.signal.peek() {
            None => UnitState::Initializing,
            Some(Ok(())) => UnitState::Ready,
            Some(Err(_)) => UnitState::Failed,
        }
    }

    /// 是否已就绪
    pub fn is_ready(&self) -> bool {
        self.state() == UnitState::Ready
    }

    /// 失败原因，仅在 `Failed` 状态下存在
    pub fn error(&self) -> Option<Arc<CoreError>> {
        self.signal.peek().and_then(|outcome| outcome.err())
    }

    /// 从创建到进入终态的耗时
    pub fn init_duration(&self) -> Option<Duration> {
        self.init_duration.get().copied()
    }

    /// 初始化耗时（毫秒）
    pub fn init_duration_ms(&self) -> Option<u64> {
        self.init_duration().map(|d| d.as_millis() as u64)
    }

    /// 创建时间
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// 就绪钩子，每次进入终态时触发一次
    pub fn ready_hook(&self) -> &Hook<ReadyEvent> {
        &self.ready_hook
    }

    pub(crate) fn ready_signal(&self) -> ReadySignal<()> {
        self.signal.clone()
    }

    /// 取回具体的模块实例
    pub fn downcast<M: Module>(&self) -> Option<Arc<M>> {
        let any = Arc::clone(&self.module.as_ref()?.any);
        any.downcast::<M>().ok()
    }

    /// 等待就绪
    ///
    /// 成功时返回单元自身；失败时返回 [`CoreError::ModuleInitFailed`]。
    /// 进入终态之前或之后调用都可以。
    pub async fn on_ready(self: &Arc<Self>) -> Result<Arc<Self>> {
        match self.signal.wait().await {
            Ok(()) => Ok(Arc::clone(self)),
            Err(source) => Err(CoreError::ModuleInitFailed {
                module: self.name.clone(),
                source,
            }),
        }
    }

    /// 进入终态
    ///
    /// `error` 为 `None` 时进入 `Ready`，否则进入 `Failed`。只有第一次调用生效，
    /// 返回值表示本次调用是否完成了状态转换。
    pub async fn set_ready(&self, error: Option<CoreError>) -> bool {
        let _ = self.init_duration.set(self.started.elapsed());

        let outcome = match error {
            None => Ok(()),
            Some(e) => Err(Arc::new(e)),
        };
        let failure = outcome.as_ref().err().cloned();
        if !self.signal.complete(outcome) {
            return false;
        }

        let duration_ms = self.init_duration_ms().unwrap_or_default();
        match &failure {
            None => {
                trace!(module = %self.name, duration_ms, "模块进入就绪状态");
                tokio::spawn(Arc::clone(&self.services).log(
                    LogLevel::Debug,
                    self.log_source.clone(),
                    format!("{} {}ms", MODULE_READY, duration_ms),
                ));
            }
            Some(e) => trace!(module = %self.name, duration_ms, error = %e, "模块进入失败状态"),
        }

        let event = ReadyEvent {
            name: self.name.clone(),
            error: failure,
        };
        if let Err(e) = self.ready_hook.invoke(event).await {
            warn!(module = %self.name, error = %e, "就绪钩子观察者执行失败");
        }
        true
    }

    /// 以错误进入失败状态
    pub async fn set_failed(&self, error: CoreError) -> bool {
        self.set_ready(Some(error)).await
    }

    /// 写一条模块日志，日志服务就绪后才真正发出
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        Arc::clone(&self.services)
            .log(level, self.log_source.clone(), message.into())
            .await;
    }
}

/// 在独立任务中运行初始化，把 panic 转为错误
async fn run_init(name: String, handle: ModuleHandle, ctx: ModuleContext) -> Result<()> {
    let module = Arc::clone(&handle.module);
    match tokio::spawn(async move { module.init(&ctx).await }).await {
        Ok(result) => result,
        Err(join_error) => {
            let reason = if join_error.is_panic() {
                let payload = join_error.into_panic();
                payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "未知 panic".to_string())
            } else {
                "初始化任务被取消".to_string()
            };
            Err(CoreError::ModulePanicked {
                module: name,
                reason,
            })
        }
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::module::loader::LoaderOptions;
    use crate::module::registry::ModuleRegistry;

    /// 无描述来源的加载器
    pub(crate) fn bare_loader() -> Arc<DependencyGraphLoader> {
        DependencyGraphLoader::new(LoaderOptions::default(), Vec::new(), ModuleRegistry::new())
    }

    /// 已就绪的空模块单元
    pub(crate) async fn ready_unit(name: &str) -> Arc<ModuleUnit> {
        struct Noop;
        impl Module for Noop {}

        let unit = ModuleUnit::spawn(
            &bare_loader(),
            Arc::new(ModuleManifest::new(name, "/tmp")),
            Ok(ModuleHandle::new(Noop)),
        );
        unit.on_ready().await.unwrap_or_else(|_| unreachable!())
    }
}
