//! 进程日志初始化
//!
//! 基于 tracing-subscriber 安装全局订阅者：
//!
//! - 控制台输出到 stderr，pretty 或 JSON 格式
//! - 可选的滚动文件输出（tracing-appender，非阻塞写入）
//! - `RUST_LOG` 优先于配置中的级别
//!
//! 配置里的级别沿用模块日志级别的名称（`verbose`、`success` 等），安装时换算成
//! tracing 的级别。
//!
//! ```rust,no_run
//! use chips_boot::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! let _guard = Logger::init(
//!     LoggerConfig::builder()
//!         .level("debug")
//!         .file_output("./logs")
//!         .rotation(RotationStrategy::Hourly)
//!         .build(),
//! )
//! .expect("日志初始化失败");
//! tracing::info!(module = "db", "ready");
//! ```

use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::{Layered, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

use crate::core::config::LogConfig;
use crate::core::services::LogLevel;
use crate::utils::{CoreError, Result};

// ============================================================================
// 日志轮转策略
// ============================================================================

/// 日志轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 不轮转
    Never,
    /// 每小时
    Hourly,
    /// 每天（默认）
    #[default]
    Daily,
}

impl RotationStrategy {
    fn to_rotation(self) -> Rotation {
        match self {
            RotationStrategy::Never => Rotation::NEVER,
            RotationStrategy::Hourly => Rotation::HOURLY,
            RotationStrategy::Daily => Rotation::DAILY,
        }
    }
}

impl FromStr for RotationStrategy {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "never" | "none" => Ok(RotationStrategy::Never),
            "hourly" | "hour" => Ok(RotationStrategy::Hourly),
            "daily" | "day" => Ok(RotationStrategy::Daily),
            other => Err(CoreError::InvalidConfigValue {
                key: "logging.rotation".to_string(),
                reason: format!("未知轮转策略 '{}'", other),
            }),
        }
    }
}

// ============================================================================
// 日志配置
// ============================================================================

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 级别或 EnvFilter 指令，例如 `info`、`verbose`、`chips_boot=debug`
    pub level: String,

    /// 是否使用 JSON 格式
    pub json_format: bool,

    /// 文件输出目录，`None` 表示不写文件
    pub file_output: Option<PathBuf>,

    /// 日志文件名前缀
    pub file_prefix: String,

    /// 轮转策略
    pub rotation: RotationStrategy,

    /// 显示事件目标
    pub show_target: bool,

    /// 显示文件名和行号
    pub show_file_line: bool,

    /// 控制台启用 ANSI 颜色
    pub ansi_colors: bool,

    /// 附加过滤指令，逗号分隔
    pub filter_directives: Option<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            file_output: None,
            file_prefix: "chips-boot".to_string(),
            rotation: RotationStrategy::Daily,
            show_target: false,
            show_file_line: false,
            ansi_colors: true,
            filter_directives: None,
        }
    }
}

impl LoggerConfig {
    /// 创建配置构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::default()
    }

    /// 从内核配置的日志部分创建
    ///
    /// 无法识别的轮转策略退回到按天轮转。
    pub fn from_log_config(log_config: &LogConfig) -> Self {
        Self {
            level: log_config.level.clone(),
            json_format: log_config.json_format,
            file_output: log_config
                .log_dir
                .clone()
                .filter(|_| log_config.file_output),
            rotation: log_config.rotation.parse().unwrap_or_default(),
            ..Self::default()
        }
    }

    /// 换算成 EnvFilter 指令
    pub fn directive(&self) -> String {
        match self.level.parse::<LogLevel>() {
            Ok(level) => tracing_level(level).to_string(),
            Err(_) => self.level.clone(),
        }
    }
}

/// 模块日志级别对应的 tracing 级别
fn tracing_level(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Error => "error",
        LogLevel::Warn => "warn",
        LogLevel::Success | LogLevel::Info => "info",
        LogLevel::Debug => "debug",
        LogLevel::Verbose => "trace",
    }
}

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 设置级别
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// 设置 JSON 格式
    pub fn json_format(mut self, enable: bool) -> Self {
        self.config.json_format = enable;
        self
    }

    /// 设置文件输出目录
    pub fn file_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.file_output = Some(dir.into());
        self
    }

    /// 设置轮转策略
    pub fn rotation(mut self, strategy: RotationStrategy) -> Self {
        self.config.rotation = strategy;
        self
    }

    /// 显示文件名和行号
    pub fn show_file_line(mut self, enable: bool) -> Self {
        self.config.show_file_line = enable;
        self
    }

    /// 设置 ANSI 颜色
    pub fn ansi_colors(mut self, enable: bool) -> Self {
        self.config.ansi_colors = enable;
        self
    }

    /// 设置附加过滤指令
    pub fn filter_directives(mut self, directives: impl Into<String>) -> Self {
        self.config.filter_directives = Some(directives.into());
        self
    }

    /// 构建配置
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

// ============================================================================
// 日志系统
// ============================================================================

/// 日志守卫
///
/// 持有非阻塞写入器的守卫，丢弃时刷新尚未写出的日志，需要保持到进程退出。
#[derive(Default)]
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
}

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// 日志系统
pub struct Logger;

impl Logger {
    /// 安装全局订阅者
    ///
    /// # Errors
    ///
    /// 已经初始化过，或者级别/过滤指令无效时返回错误。
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if LOGGER_INITIALIZED.get().is_some() {
            return Err(CoreError::InitFailed(
                "日志系统已初始化，不能重复初始化".to_string(),
            ));
        }

        let filter = Self::create_env_filter(&config)?;
        let mut guard = LogGuard::default();
        let mut layers: Vec<BoxedLayer<Layered<EnvFilter, Registry>>> = Vec::new();

        let (console, console_guard) = tracing_appender::non_blocking(io::stderr());
        guard._guards.push(console_guard);
        layers.push(output_layer(&config, console, config.ansi_colors));

        if let Some(dir) = &config.file_output {
            let appender = RollingFileAppender::new(
                config.rotation.to_rotation(),
                dir,
                format!("{}.log", config.file_prefix),
            );
            let (file, file_guard) = tracing_appender::non_blocking(appender);
            guard._guards.push(file_guard);
            layers.push(output_layer(&config, file, false));
        }

        tracing_subscriber::registry()
            .with(filter)
            .with(layers)
            .try_init()
            .map_err(|e| CoreError::InitFailed(format!("日志系统初始化失败: {}", e)))?;

        let _ = LOGGER_INITIALIZED.set(());
        Ok(guard)
    }

    /// 尝试初始化，失败时返回空守卫
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_default()
    }

    fn create_env_filter(config: &LoggerConfig) -> Result<EnvFilter> {
        let invalid = |reason: String| CoreError::InvalidConfigValue {
            key: "logging.level".to_string(),
            reason,
        };

        let mut filter = match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(config.directive()).map_err(|e| invalid(e.to_string()))?,
        };

        if let Some(directives) = &config.filter_directives {
            for directive in directives.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                filter = filter.add_directive(
                    directive
                        .parse()
                        .map_err(|e| invalid(format!("'{}': {}", directive, e)))?,
                );
            }
        }

        Ok(filter)
    }
}

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

fn output_layer<S, W>(config: &LoggerConfig, writer: W, ansi: bool) -> BoxedLayer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_target(config.show_target)
        .with_file(config.show_file_line)
        .with_line_number(config.show_file_line);

    if config.json_format {
        layer.json().with_ansi(false).boxed()
    } else {
        layer.with_ansi(ansi).boxed()
    }
}
