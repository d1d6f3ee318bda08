//! 内置日志模块
//!
//! 把模块日志转发到 tracing，附带 `source` 字段。支持两个配置项：
//!
//! - `logger.level`：最详细的输出级别，默认 `info`
//! - `logger.mute`：不输出的来源列表

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use crate::core::services::{emit_tracing, LogLevel, LogSink};
use crate::module::context::ModuleContext;
use crate::module::unit::Module;
use crate::utils::{CoreError, Result};

/// 转发到 tracing 的日志服务
#[derive(Debug, Clone)]
pub struct TracingSink {
    threshold: LogLevel,
    muted: BTreeSet<String>,
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new(LogLevel::Info)
    }
}

impl TracingSink {
    /// 以级别阈值创建
    pub fn new(threshold: LogLevel) -> Self {
        Self {
            threshold,
            muted: BTreeSet::new(),
        }
    }

    /// 屏蔽来源
    pub fn mute(mut self, source: impl Into<String>) -> Self {
        self.muted.insert(source.into());
        self
    }

    /// 是否输出该条日志
    pub fn enabled(&self, level: LogLevel, source: &str) -> bool {
        level <= self.threshold && !self.muted.contains(source)
    }
}

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, source: &str, message: &str) {
        if self.enabled(level, source) {
            emit_tracing(level, source, message);
        }
    }
}

/// 日志模块
#[derive(Debug, Default)]
pub struct LoggerModule;

#[async_trait]
impl Module for LoggerModule {
    async fn init(&self, ctx: &ModuleContext) -> Result<()> {
        ctx.wait_for_module(super::CONFIG_MODULE).await?;

        let threshold = match ctx.get_config_as::<String>("level") {
            Some(level) => level.parse::<LogLevel>().map_err(|_| CoreError::InvalidConfigValue {
                key: format!("{}.level", ctx.name()),
                reason: format!("未知日志级别 '{}'", level),
            })?,
            None => LogLevel::Info,
        };

        let sink = ctx
            .get_config_as::<Vec<String>>("mute")
            .unwrap_or_default()
            .into_iter()
            .fold(TracingSink::new(threshold), TracingSink::mute);

        tracing::debug!(module = %ctx.name(), threshold = %threshold, "日志服务已配置");
        ctx.provide_logger(Arc::new(sink));
        Ok(())
    }
}
