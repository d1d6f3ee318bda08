//! 协作服务
//!
//! 内核自身不实现日志传输与配置合并，而是由模块在初始化时把自己注册为
//! 日志服务（[`LogSink`]）或配置服务（[`ConfigSource`]）。服务的就绪状态
//! 即提供它的模块的就绪状态。
//!
//! 日志服务尚未出现时，模块日志通过模块加载钩子上一个会自行移除的观察者
//! 延迟发出；内核自身的日志则直接写到 tracing。

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, OnceLock, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, error, info, trace, warn};

use crate::hook::{Hook, ObserverId};
use crate::module::loader::ModuleLoaded;
use crate::module::ready::ReadySignal;
use crate::utils::CoreError;

// ============================================================================
// 日志级别
// ============================================================================

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// 错误
    Error,
    /// 警告
    Warn,
    /// 成功
    Success,
    /// 信息
    Info,
    /// 调试
    Debug,
    /// 详细
    Verbose,
}

impl LogLevel {
    /// 全部级别，按严重程度排列
    pub const ALL: [LogLevel; 6] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Success,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Verbose,
    ];

    /// 小写名称
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Success => "success",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Verbose => "verbose",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "success" => Ok(LogLevel::Success),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "verbose" | "trace" => Ok(LogLevel::Verbose),
            other => Err(CoreError::InvalidConfigValue {
                key: "level".to_string(),
                reason: format!("未知日志级别 '{}'", other),
            }),
        }
    }
}

/// 直接写到 tracing
pub fn emit_tracing(level: LogLevel, source: &str, message: &str) {
    match level {
        LogLevel::Error => error!(source = %source, "{}", message),
        LogLevel::Warn => warn!(source = %source, "{}", message),
        LogLevel::Success => info!(source = %source, success = true, "{}", message),
        LogLevel::Info => info!(source = %source, "{}", message),
        LogLevel::Debug => debug!(source = %source, "{}", message),
        LogLevel::Verbose => trace!(source = %source, "{}", message),
    }
}

// ============================================================================
// 服务接口
// ============================================================================

/// 日志服务
pub trait LogSink: Send + Sync {
    /// 写一条日志
    fn log(&self, level: LogLevel, source: &str, message: &str);
}

/// 配置服务
pub trait ConfigSource: Send + Sync {
    /// 按点分键读取配置值，例如 `logger.level`
    fn get(&self, key: &str) -> Option<Value>;
}

struct Provided<T: ?Sized> {
    provider: String,
    value: Arc<T>,
    ready: ReadySignal<()>,
}

impl<T: ?Sized> Clone for Provided<T> {
    fn clone(&self) -> Self {
        Self {
            provider: self.provider.clone(),
            value: Arc::clone(&self.value),
            ready: self.ready.clone(),
        }
    }
}

impl<T: ?Sized> Provided<T> {
    fn is_ready(&self) -> bool {
        matches!(self.ready.peek(), Some(Ok(())))
    }
}

// ============================================================================
// 服务表
// ============================================================================

/// 一次引导共享的服务表
pub struct Services {
    logger: RwLock<Option<Provided<dyn LogSink>>>,
    config: RwLock<Option<Provided<dyn ConfigSource>>>,
    module_loaded: Arc<Hook<ModuleLoaded>>,
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("logger", &self.logger_provider())
            .field("config", &self.config_provider())
            .finish()
    }
}

fn read<T: Clone>(slot: &RwLock<Option<T>>) -> Option<T> {
    match slot.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn write<T>(slot: &RwLock<Option<T>>, value: T) {
    match slot.write() {
        Ok(mut guard) => *guard = Some(value),
        Err(poisoned) => *poisoned.into_inner() = Some(value),
    }
}

impl Services {
    /// 创建服务表
    pub fn new(module_loaded: Arc<Hook<ModuleLoaded>>) -> Self {
        Self {
            logger: RwLock::new(None),
            config: RwLock::new(None),
            module_loaded,
        }
    }

    /// 模块加载钩子
    pub fn module_loaded_hook(&self) -> &Arc<Hook<ModuleLoaded>> {
        &self.module_loaded
    }

    /// 注册日志服务
    pub fn provide_logger(&self, provider: &str, sink: Arc<dyn LogSink>, ready: ReadySignal<()>) {
        debug!(provider = %provider, "注册日志服务");
        write(
            &self.logger,
            Provided {
                provider: provider.to_string(),
                value: sink,
                ready,
            },
        );
    }

    /// 注册配置服务
    pub fn provide_config(
        &self,
        provider: &str,
        source: Arc<dyn ConfigSource>,
        ready: ReadySignal<()>,
    ) {
        debug!(provider = %provider, "注册配置服务");
        write(
            &self.config,
            Provided {
                provider: provider.to_string(),
                value: source,
                ready,
            },
        );
    }

    /// 提供日志服务的模块
    pub fn logger_provider(&self) -> Option<String> {
        read(&self.logger).map(|p| p.provider)
    }

    /// 提供配置服务的模块
    pub fn config_provider(&self) -> Option<String> {
        read(&self.config).map(|p| p.provider)
    }

    /// 已就绪的日志服务
    pub fn ready_logger(&self) -> Option<Arc<dyn LogSink>> {
        read(&self.logger).filter(Provided::is_ready).map(|p| p.value)
    }

    /// 已就绪的配置服务
    pub fn ready_config(&self) -> Option<Arc<dyn ConfigSource>> {
        read(&self.config).filter(Provided::is_ready).map(|p| p.value)
    }

    /// 读取配置，配置服务未就绪时返回 `None`
    pub fn get_config(&self, key: &str) -> Option<Value> {
        self.ready_config().and_then(|config| config.get(key))
    }

    /// 立即写日志
    ///
    /// 日志服务已就绪时交给它，否则直接写到 tracing。
    pub fn log_now(&self, level: LogLevel, source: &str, message: &str) {
        match self.ready_logger() {
            Some(sink) => sink.log(level, source, message),
            None => emit_tracing(level, source, message),
        }
    }

    /// 等待日志服务后写日志
    ///
    /// 日志服务尚未注册时，在模块加载钩子上挂一个观察者，服务一出现就移除自己；
    /// 之后再等待服务就绪。提供服务的模块失败时退回到 tracing。
    pub async fn log(self: Arc<Self>, level: LogLevel, source: String, message: String) {
        if read(&self.logger).is_none() {
            self.wait_for_logger().await;
        }

        match read(&self.logger) {
            Some(provided) => match provided.ready.wait().await {
                Ok(()) => provided.value.log(level, &source, &message),
                Err(_) => emit_tracing(level, &source, &message),
            },
            None => emit_tracing(level, &source, &message),
        }
    }

    async fn wait_for_logger(self: &Arc<Self>) {
        let (tx, rx) = oneshot::channel::<()>();
        let tx = Mutex::new(Some(tx));
        let own_id: Arc<OnceLock<ObserverId>> = Arc::new(OnceLock::new());

        let services = Arc::downgrade(self);
        let id_slot = Arc::clone(&own_id);
        let id = self.module_loaded.tap(move |_event: ModuleLoaded| {
            if let Some(services) = services.upgrade() {
                if read(&services.logger).is_some() {
                    if let Some(id) = id_slot.get() {
                        services.module_loaded.untap(*id);
                    }
                    let sender = match tx.lock() {
                        Ok(mut guard) => guard.take(),
                        Err(poisoned) => poisoned.into_inner().take(),
                    };
                    if let Some(sender) = sender {
                        let _ = sender.send(());
                    }
                }
            }
            async { Ok(()) }
        });
        let _ = own_id.set(id);

        // 注册观察者之前服务可能已经出现
        if read(&self.logger).is_some() {
            self.module_loaded.untap(id);
            return;
        }

        // 钩子被释放时发送端随之丢弃，这里同样返回
        let _ = rx.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingSink {
        lines: StdMutex<Vec<String>>,
    }

    impl LogSink for RecordingSink {
        fn log(&self, level: LogLevel, source: &str, message: &str) {
            self.lines
                .lock()
                .unwrap()
                .push(format!("{level} {source} {message}"));
        }
    }

    struct MapConfig(serde_json::Map<String, Value>);

    impl ConfigSource for MapConfig {
        fn get(&self, key: &str) -> Option<Value> {
            self.0.get(key).cloned()
        }
    }

    fn services() -> Arc<Services> {
        Arc::new(Services::new(Arc::new(Hook::concurrent("moduleloaded"))))
    }

    #[test]
    fn test_log_level_parse_and_order() {
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!("trace".parse::<LogLevel>().unwrap(), LogLevel::Verbose);
        assert!("loud".parse::<LogLevel>().is_err());
        assert!(LogLevel::Error < LogLevel::Debug);
    }

    #[tokio::test]
    async fn test_config_requires_ready_provider() {
        let services = services();
        assert!(services.get_config("a.b").is_none());

        let ready = ReadySignal::new();
        let mut map = serde_json::Map::new();
        map.insert("a.b".into(), Value::from(3));
        services.provide_config("config", Arc::new(MapConfig(map)), ready.clone());
        assert_eq!(services.config_provider().as_deref(), Some("config"));
        assert!(services.get_config("a.b").is_none());

        ready.complete(Ok(()));
        assert_eq!(services.get_config("a.b"), Some(Value::from(3)));
    }

    #[tokio::test]
    async fn test_log_now_uses_ready_sink() {
        let services = services();
        let sink = Arc::new(RecordingSink::default());
        let ready = ReadySignal::new();
        services.provide_logger("logger", sink.clone(), ready.clone());

        // 尚未就绪，写到 tracing
        services.log_now(LogLevel::Info, "core", "early");
        assert!(sink.lines.lock().unwrap().is_empty());

        ready.complete(Ok(()));
        services.log_now(LogLevel::Info, "core", "late");
        assert_eq!(*sink.lines.lock().unwrap(), vec!["info core late"]);
    }

    #[tokio::test]
    async fn test_deferred_log_waits_for_logger_and_untaps() {
        let services = services();
        let hook = Arc::clone(services.module_loaded_hook());

        let pending = tokio::spawn(Arc::clone(&services).log(
            LogLevel::Debug,
            "db".to_string(),
            "ready".to_string(),
        ));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(hook.len(), 1);

        let sink = Arc::new(RecordingSink::default());
        let ready = ReadySignal::new();
        services.provide_logger("logger", sink.clone(), ready.clone());
        ready.complete(Ok(()));

        // 下一次模块加载事件触发观察者
        let unit = crate::module::unit::tests_support::ready_unit("logger").await;
        hook.invoke(ModuleLoaded::new(unit, None)).await.unwrap();

        pending.await.unwrap();
        assert_eq!(*sink.lines.lock().unwrap(), vec!["debug db ready"]);
        assert!(!hook.has_observers());
    }

    #[tokio::test]
    async fn test_deferred_log_falls_back_when_provider_fails() {
        let services = services();
        let sink = Arc::new(RecordingSink::default());
        let ready = ReadySignal::new();
        services.provide_logger("logger", sink.clone(), ready.clone());
        ready.complete(Err(Arc::new(CoreError::InitFailed("broken".into()))));

        Arc::clone(&services)
            .log(LogLevel::Warn, "db".into(), "message".into())
            .await;
        assert!(sink.lines.lock().unwrap().is_empty());
    }
}
