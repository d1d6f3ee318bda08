//! 模块初始化上下文
//!
//! [`ModuleContext`] 在初始化时交给模块，提供读取配置、写日志、等待其他模块
//! 以及注册协作服务的入口。

use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::services::{ConfigSource, LogLevel, LogSink};
use crate::module::loader::DependencyGraphLoader;
use crate::module::manifest::ModuleManifest;
use crate::module::unit::ModuleUnit;
use crate::utils::Result;

/// 模块初始化上下文
#[derive(Clone)]
pub struct ModuleContext {
    loader: Arc<DependencyGraphLoader>,
    unit: Arc<ModuleUnit>,
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module", &self.unit.name())
            .finish()
    }
}

impl ModuleContext {
    pub(crate) fn new(loader: Arc<DependencyGraphLoader>, unit: Arc<ModuleUnit>) -> Self {
        Self { loader, unit }
    }

    /// 模块名称
    pub fn name(&self) -> &str {
        self.unit.name()
    }

    /// 模块描述
    pub fn manifest(&self) -> &Arc<ModuleManifest> {
        self.unit.manifest()
    }

    /// 模块根目录
    pub fn root_dir(&self) -> &Path {
        &self.unit.manifest().root_dir
    }

    /// 当前模块单元
    pub fn unit(&self) -> &Arc<ModuleUnit> {
        &self.unit
    }

    /// 所属加载器
    pub fn loader(&self) -> &Arc<DependencyGraphLoader> {
        &self.loader
    }

    /// 进程参数
    pub fn arg(&self, key: &str) -> Option<&str> {
        self.loader.args().get(key)
    }

    /// 读取本模块的配置项
    ///
    /// 实际读取的键为 `<模块名>.<key>`；配置服务未就绪时返回 `None`。
    pub fn get_config(&self, key: &str) -> Option<Value> {
        self.loader
            .services()
            .get_config(&format!("{}.{}", self.name(), key))
    }

    /// 读取本模块的配置项并反序列化
    ///
    /// 值不存在或类型不符时返回 `None`。
    pub fn get_config_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_config(key)
            .and_then(|value| serde_json::from_value(value).ok())
    }

    /// 写一条模块日志
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.unit.log(level, message).await;
    }

    /// 等待另一个模块就绪
    pub async fn wait_for_module(&self, name: &str) -> Result<Arc<ModuleUnit>> {
        self.loader.wait_for_module(name).await
    }

    /// 等待多个模块就绪，结果与参数顺序一致
    pub async fn wait_for_modules(&self, names: &[&str]) -> Result<Vec<Arc<ModuleUnit>>> {
        self.loader.wait_for_modules(names).await
    }

    /// 把本模块注册为日志服务，服务在本模块就绪后可用
    pub fn provide_logger(&self, sink: Arc<dyn LogSink>) {
        self.loader
            .services()
            .provide_logger(self.name(), sink, self.unit.ready_signal());
    }

    /// 把本模块注册为配置服务，服务在本模块就绪后可用
    pub fn provide_config(&self, source: Arc<dyn ConfigSource>) {
        self.loader
            .services()
            .provide_config(self.name(), source, self.unit.ready_signal());
    }
}
