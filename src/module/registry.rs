//! 模块工厂注册表
//!
//! 模块描述只说明"有哪些模块"，而模块的实现由宿主程序在启动前按名称注册。
//! 加载器按加载顺序为每个描述调用对应的工厂；没有工厂的模块直接失败。

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::module::manifest::ModuleManifest;
use crate::module::unit::{Module, ModuleHandle};
use crate::utils::{CoreError, Result};

/// 模块工厂
pub type ModuleFactory = Arc<dyn Fn(&ModuleManifest) -> Result<ModuleHandle> + Send + Sync>;

/// 模块工厂注册表
#[derive(Clone, Default)]
pub struct ModuleRegistry {
    /// 模块名称 -> 工厂
    factories: HashMap<String, ModuleFactory>,

    /// 没有专用工厂时使用
    fallback: Option<ModuleFactory>,
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("ModuleRegistry")
            .field("factories", &names)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl ModuleRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册工厂，同名工厂会被替换
    ///
    /// # Arguments
    ///
    /// * `name` - 模块名称，与描述中的 `name` 完全一致
    /// * `factory` - 根据描述构造模块实例
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ModuleManifest) -> Result<ModuleHandle> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// 以 `Default` 构造模块
    pub fn register_default<M>(&mut self, name: impl Into<String>) -> &mut Self
    where
        M: Module + Default,
    {
        self.register(name, |_| Ok(ModuleHandle::new(M::default())))
    }

    /// 设置兜底工厂
    pub fn set_fallback<F>(&mut self, factory: F) -> &mut Self
    where
        F: Fn(&ModuleManifest) -> Result<ModuleHandle> + Send + Sync + 'static,
    {
        self.fallback = Some(Arc::new(factory));
        self
    }

    /// 是否有对应的工厂（不含兜底工厂）
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// 已注册的模块名称
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// 构造模块实例
    pub fn create(&self, manifest: &ModuleManifest) -> Result<ModuleHandle> {
        match self
            .factories
            .get(&manifest.name)
            .or(self.fallback.as_ref())
        {
            Some(factory) => factory(manifest),
            None => Err(CoreError::FactoryMissing(manifest.name.clone())),
        }
    }
}
