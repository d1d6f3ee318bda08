//! 内置模块
//!
//! 内核附带两个模块，分别提供配置服务与日志服务：
//!
//! | 模块 | 能力 | 依赖 |
//! |------|------|------|
//! | [`CONFIG_MODULE`] | `config` | 无 |
//! | [`LOGGER_MODULE`] | `logger` | `config` |
//!
//! 它们以内存描述的形式加入发现结果。关闭内置模块后可以用同名的外部模块替换，
//! 否则会被判定为重名。

mod config;
mod logger;

pub use config::ConfigModule;
pub use logger::{LoggerModule, TracingSink};

use std::path::Path;
use std::sync::Arc;

use crate::core::config::ConfigStore;
use crate::module::manifest::ModuleManifest;
use crate::module::registry::ModuleRegistry;
use crate::module::unit::ModuleHandle;

/// 内置配置模块名称
pub const CONFIG_MODULE: &str = "config";

/// 内置日志模块名称
pub const LOGGER_MODULE: &str = "logger";

/// 内置模块描述
pub fn manifests(root_dir: &Path) -> Vec<ModuleManifest> {
    vec![
        ModuleManifest::new(CONFIG_MODULE, root_dir)
            .with_version(crate::VERSION)
            .with_description("分层配置服务")
            .with_essential_type("config"),
        ModuleManifest::new(LOGGER_MODULE, root_dir)
            .with_version(crate::VERSION)
            .with_description("tracing 日志服务")
            .with_essential_type("logger")
            .with_dependency(CONFIG_MODULE),
    ]
}

/// 注册内置模块工厂
pub fn register(registry: &mut ModuleRegistry, store: Arc<ConfigStore>) {
    registry
        .register(CONFIG_MODULE, move |_| {
            Ok(ModuleHandle::new(ConfigModule::new(Arc::clone(&store))))
        })
        .register_default::<LoggerModule>(LOGGER_MODULE);
}
