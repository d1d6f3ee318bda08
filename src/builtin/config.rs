//! 内置配置模块

use std::sync::Arc;

use async_trait::async_trait;

use crate::core::config::ConfigStore;
use crate::core::services::LogLevel;
use crate::module::context::ModuleContext;
use crate::module::unit::Module;
use crate::utils::Result;

/// 把 [`ConfigStore`] 注册为配置服务
#[derive(Debug, Clone)]
pub struct ConfigModule {
    store: Arc<ConfigStore>,
}

impl ConfigModule {
    /// 创建模块
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self { store }
    }

    /// 配置文档
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }
}

#[async_trait]
impl Module for ConfigModule {
    async fn init(&self, ctx: &ModuleContext) -> Result<()> {
        ctx.provide_config(self.store.clone());

        let keys = self
            .store
            .root()
            .as_object()
            .map(|map| map.len())
            .unwrap_or(0);
        let origin = self
            .store
            .path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "内存".to_string());
        // 日志在日志服务就绪后才发出，不能阻塞本模块的初始化
        let ctx = ctx.clone();
        tokio::spawn(async move {
            ctx.log(
                LogLevel::Verbose,
                format!("已加载 {} 个顶层配置项 ({})", keys, origin),
            )
            .await;
        });
        Ok(())
    }
}
