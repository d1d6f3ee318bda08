//! 薯片引导内核错误类型定义
//!
//! 本模块定义了内核中使用的所有错误类型，并按照引导流程划分为
//! 发现、初始化、能力、查询等几类，见 [`ErrorKind`]。

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// 薯片引导内核核心错误类型
#[derive(Error, Debug)]
pub enum CoreError {
    // ==================== 模块发现错误 ====================

    /// 模块描述文件无法读取或格式无效
    #[error("无效的模块描述: '{}' - {reason}", .path.display())]
    InvalidManifest {
        path: PathBuf,
        reason: String,
    },

    /// 模块名称重复
    #[error("模块名称重复: '{name}' 同时出现在 '{}' 与 '{}'", .first.display(), .second.display())]
    DuplicateModule {
        name: String,
        first: PathBuf,
        second: PathBuf,
    },

    /// 循环依赖
    #[error("检测到循环依赖: {0}")]
    CircularDependency(String),

    // ==================== 模块初始化错误 ====================

    /// 模块初始化失败
    #[error("模块初始化失败: '{module}' - {source}")]
    ModuleInitFailed {
        module: String,
        #[source]
        source: Arc<CoreError>,
    },

    /// 模块初始化过程中发生 panic
    #[error("模块初始化异常终止: '{module}' - {reason}")]
    ModulePanicked {
        module: String,
        reason: String,
    },

    /// 没有为模块注册构造工厂
    #[error("未注册模块工厂: '{0}'")]
    FactoryMissing(String),

    // ==================== 能力检查错误 ====================

    /// 必需的能力没有任何已就绪模块提供
    #[error("缺少必需能力: {0:?}")]
    MissingCapability(Vec<String>),

    /// 引导结束时存在失败模块或缺失能力
    #[error("引导失败: 失败模块 {failed:?}, 缺失能力 {missing_capabilities:?}")]
    BootFailed {
        failed: Vec<String>,
        missing_capabilities: Vec<String>,
    },

    // ==================== 查询错误 ====================

    /// 模块未找到
    #[error("缺少所需模块: '{0}'")]
    ModuleNotFound(String),

    // ==================== 钩子错误 ====================

    /// 钩子观察者执行失败
    #[error("钩子 '{hook}' 有 {} 个观察者失败: {}", .failures.len(), join_errors(.failures))]
    Hook {
        hook: String,
        failures: Vec<Arc<CoreError>>,
    },

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        key: String,
        reason: String,
    },

    // ==================== IO 和序列化错误 ====================

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON 序列化/反序列化错误
    #[error("JSON 错误: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML 序列化/反序列化错误
    #[error("YAML 错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    // ==================== 通用错误 ====================

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// 初始化失败
    #[error("初始化失败: {0}")]
    InitFailed(String),

    /// 其他错误
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

fn join_errors(failures: &[Arc<CoreError>]) -> String {
    failures
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// 内核操作结果类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

/// 错误类别
///
/// 对应引导流程中错误被观察到的阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 发现阶段（描述文件、重名、循环依赖），对整次加载是致命的
    Discovery,
    /// 单个模块初始化失败，不影响其他模块
    Initialization,
    /// 能力覆盖检查失败
    Capability,
    /// 查询未知模块
    Lookup,
    /// 钩子观察者失败
    Hook,
    /// 配置相关
    Config,
    /// 其他
    Other,
}

/// 错误码常量
pub mod error_code {
    // 发现错误 (DISCOVERY-xxx)
    pub const DISCOVERY_INVALID_MANIFEST: &str = "DISCOVERY-001";
    pub const DISCOVERY_DUPLICATE_MODULE: &str = "DISCOVERY-002";
    pub const DISCOVERY_CIRCULAR_DEPENDENCY: &str = "DISCOVERY-003";

    // 模块错误 (MODULE-xxx)
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";
    pub const MODULE_INIT_FAILED: &str = "MODULE-002";
    pub const MODULE_PANICKED: &str = "MODULE-003";
    pub const MODULE_FACTORY_MISSING: &str = "MODULE-004";

    // 能力错误 (CAPABILITY-xxx)
    pub const CAPABILITY_MISSING: &str = "CAPABILITY-001";
    pub const CAPABILITY_BOOT_FAILED: &str = "CAPABILITY-002";

    // 钩子错误 (HOOK-xxx)
    pub const HOOK_OBSERVER_FAILED: &str = "HOOK-001";

    // 配置错误 (CONFIG-xxx)
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";

    // 核心错误 (CORE-xxx)
    pub const CORE_INIT_FAILED: &str = "CORE-001";
    pub const CORE_INTERNAL: &str = "CORE-002";
}

impl CoreError {
    /// 获取错误类别
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::InvalidManifest { .. }
            | CoreError::DuplicateModule { .. }
            | CoreError::CircularDependency(_)
            | CoreError::Io(_)
            | CoreError::Json(_)
            | CoreError::Yaml(_) => ErrorKind::Discovery,
            CoreError::ModuleInitFailed { .. }
            | CoreError::ModulePanicked { .. }
            | CoreError::FactoryMissing(_) => ErrorKind::Initialization,
            CoreError::MissingCapability(_) | CoreError::BootFailed { .. } => {
                ErrorKind::Capability
            }
            CoreError::ModuleNotFound(_) => ErrorKind::Lookup,
            CoreError::Hook { .. } => ErrorKind::Hook,
            CoreError::ConfigLoadFailed(_) | CoreError::InvalidConfigValue { .. } => {
                ErrorKind::Config
            }
            CoreError::Internal(_) | CoreError::InitFailed(_) | CoreError::Other(_) => {
                ErrorKind::Other
            }
        }
    }

    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::InvalidManifest { .. } => error_code::DISCOVERY_INVALID_MANIFEST,
            CoreError::DuplicateModule { .. } => error_code::DISCOVERY_DUPLICATE_MODULE,
            CoreError::CircularDependency(_) => error_code::DISCOVERY_CIRCULAR_DEPENDENCY,
            CoreError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            CoreError::ModuleInitFailed { .. } => error_code::MODULE_INIT_FAILED,
            CoreError::ModulePanicked { .. } => error_code::MODULE_PANICKED,
            CoreError::FactoryMissing(_) => error_code::MODULE_FACTORY_MISSING,
            CoreError::MissingCapability(_) => error_code::CAPABILITY_MISSING,
            CoreError::BootFailed { .. } => error_code::CAPABILITY_BOOT_FAILED,
            CoreError::Hook { .. } => error_code::HOOK_OBSERVER_FAILED,
            CoreError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            CoreError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            CoreError::InitFailed(_) => error_code::CORE_INIT_FAILED,
            CoreError::Internal(_) => error_code::CORE_INTERNAL,
            _ => "UNKNOWN",
        }
    }
}
