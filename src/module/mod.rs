//! 模块管理模块
//!
//! 包含模块引导的核心组件：
//! - 模块描述的发现与读取
//! - 依赖图与加载顺序
//! - 模块单元的生命周期
//! - 依赖图加载器

pub mod capability;
pub mod context;
pub mod dependency;
pub mod loader;
pub mod manifest;
pub mod parser;
pub mod ready;
pub mod registry;
pub mod unit;

// 重导出常用类型
pub use capability::CapabilityTable;
pub use context::ModuleContext;
pub use dependency::DependencyGraph;
pub use loader::{DependencyGraphLoader, FailedModule, LoadReport, LoaderOptions, ModuleLoaded};
pub use manifest::ModuleManifest;
pub use parser::{FsManifestSource, ManifestReader, ManifestSource, StaticManifests};
pub use ready::{Outcome, ReadySignal};
pub use registry::{ModuleFactory, ModuleRegistry};
pub use unit::{Module, ModuleHandle, ModuleUnit, ReadyEvent, UnitState};
