//! # Chips Boot - 模块引导内核
//!
//! 按依赖顺序发现、初始化并监督一组模块：
//!
//! - **就绪信号**: 一次性完成、可被任意多方等待的结果
//! - **观察者钩子**: 并发或顺序通知观察者，支持等待下一次触发
//! - **模块单元**: 单个模块的初始化与状态
//! - **依赖图加载器**: 发现模块描述、拓扑排序、逐个启动并记录失败
//! - **应用**: 引导的根，汇总结果并给出退出码
//!
//! 配置与日志本身也是模块（见 [`builtin`]）。在它们就绪之前发出的模块日志会被
//! 推迟，待日志服务就绪后再输出。
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use chips_boot::{AppOptions, Application, Module, ModuleContext, ModuleHandle, ModuleRegistry};
//!
//! struct Database;
//!
//! #[async_trait::async_trait]
//! impl Module for Database {
//!     async fn init(&self, ctx: &ModuleContext) -> chips_boot::Result<()> {
//!         let url = ctx.get_config_as::<String>("url");
//!         tracing::info!(url = ?url, "连接数据库");
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = ModuleRegistry::new();
//!     registry.register("db", |_| Ok(ModuleHandle::new(Database)));
//!
//!     let app = Application::new(AppOptions::from_env().with_registry(registry));
//!     app.on_ready().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `api` - 应用入口
//! - `builtin` - 内置配置与日志模块
//! - `core` - 配置、进程参数与共享服务
//! - `hook` - 观察者钩子
//! - `module` - 模块描述、单元与依赖图加载器
//! - `utils` - 错误类型、标识与日志初始化

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod builtin;
pub mod core;
pub mod hook;
pub mod module;
pub mod utils;

// 重导出常用类型
pub use api::{AppOptions, Application, ROOT_MODULE_NAME};

pub use hook::{Hook, HookMode, MutableHook, ObserverId};

pub use module::{
    DependencyGraph, DependencyGraphLoader, FsManifestSource, LoadReport, LoaderOptions, Module,
    ModuleContext, ModuleHandle, ModuleLoaded, ModuleManifest, ModuleRegistry, ModuleUnit,
    Outcome, ReadySignal, StaticManifests, UnitState,
};

pub use crate::core::{
    ConfigSource, ConfigStore, CoreConfig, CoreConfigBuilder, LogConfig, LogLevel, LogSink,
    ModuleConfig, ProcessArgs,
};

pub use utils::{error_code, CoreError, ErrorKind, Result};
pub use utils::logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
