//! 工具模块
//!
//! 包含错误类型、ID 生成与日志初始化。

pub mod error;
pub mod id;
pub mod logger;

// 重导出常用类型
pub use error::{error_code, CoreError, ErrorKind, Result};
pub use id::generate_id;
pub use logger::{LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
