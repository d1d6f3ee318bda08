//! 核心模块
//!
//! 包含内核配置、进程参数和协作服务。

pub mod args;
pub mod config;
pub mod services;

pub use args::ProcessArgs;
pub use config::{ConfigStore, CoreConfig, CoreConfigBuilder, LogConfig, ModuleConfig};
pub use services::{emit_tracing, ConfigSource, LogLevel, LogSink, Services};
