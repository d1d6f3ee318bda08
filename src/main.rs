//! chips-boot 命令行入口
//!
//! # 命令概览
//!
//! - `start` - 引导应用（默认命令），按 Ctrl+C 退出
//! - `list-modules` - 列出发现的模块及加载顺序
//! - `check` - 检查模块描述（重名、循环依赖、能力提供者）
//! - `version` - 显示版本信息
//!
//! # 使用示例
//!
//! ```bash
//! # 在当前目录引导
//! chips-boot
//!
//! # 指定根目录并覆盖配置
//! chips-boot --root-dir /srv/app --set logger.level=debug start
//!
//! # 检查模块描述
//! chips-boot check
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::signal;
use tracing::{error, info};

use chips_boot::module::CapabilityTable;
use chips_boot::{
    AppOptions, Application, ConfigStore, CoreConfig, DependencyGraphLoader, Logger,
    LoggerConfig, Module, ModuleHandle, ModuleRegistry, ProcessArgs,
};

/// chips-boot - 模块引导内核
#[derive(Parser)]
#[command(name = "chips-boot")]
#[command(version, about = "按依赖顺序发现、加载并监督模块", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径，相对路径基于根目录
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// 应用根目录（默认当前目录）
    #[arg(long, global = true)]
    root_dir: Option<PathBuf>,

    /// 日志级别 (error, warn, success, info, debug, verbose)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 开发模式（日志带文件名与行号）
    #[arg(long, global = true)]
    dev: bool,

    /// 覆盖配置项，可重复，例如 `--set logger.level=debug`
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    overrides: Vec<String>,

    /// 没有实现的模块直接视为就绪
    #[arg(long, global = true)]
    passive: bool,

    /// 子命令
    #[command(subcommand)]
    command: Option<Commands>,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 引导应用
    ///
    /// 发现并按依赖顺序加载全部模块。任一模块失败或必需能力缺失时以 1 退出。
    Start,

    /// 列出发现的模块
    ListModules,

    /// 检查模块描述
    ///
    /// 只做发现与排序，不初始化任何模块。
    Check,

    /// 查看版本信息
    Version,
}

/// 只有描述、没有实现的模块
struct Passive;

impl Module for Passive {}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Commands::Version)) {
        print_version();
        return ExitCode::SUCCESS;
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let root_dir = match &cli.root_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()?,
    };
    let config_path = if cli.config.is_absolute() {
        cli.config.clone()
    } else {
        root_dir.join(&cli.config)
    };

    let mut store = ConfigStore::load(&config_path).await?;
    for assignment in &cli.overrides {
        store.apply_override(assignment)?;
    }
    if let Some(level) = &cli.log_level {
        store.set("logging.level", Value::from(level.as_str()));
        store.set("logger.level", Value::from(level.as_str()));
    }
    if cli.dev {
        store.set("dev_mode", Value::Bool(true));
    }

    let core = CoreConfig::from_store(&store)?;
    let mut logger_config = LoggerConfig::from_log_config(&core.logging);
    logger_config.show_file_line = core.dev_mode;
    let _guard = Logger::try_init(logger_config);
    info!(config = %config_path.display(), "已加载配置");

    let mut args = ProcessArgs::from_env();
    if let Some(dir) = &cli.root_dir {
        args.set("root-dir", dir.display().to_string());
    }

    let mut registry = ModuleRegistry::new();
    if cli.passive {
        registry.set_fallback(|_| Ok(ModuleHandle::new(Passive)));
    }

    let options = AppOptions::new(root_dir)
        .with_config(store)
        .with_args(args)
        .with_registry(registry);

    match cli.command {
        Some(Commands::Start) | None => run_start(options).await,
        Some(Commands::ListModules) => list_modules(&options).await,
        Some(Commands::Check) => check(&options).await,
        Some(Commands::Version) => {
            print_version();
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// 引导应用并等待关闭信号
async fn run_start(options: AppOptions) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let app = Application::new(options);

    if let Err(e) = app.on_ready().await {
        error!(error = %e, "引导失败");
        return Ok(ExitCode::from(app.exit_code().unwrap_or(1) as u8));
    }

    let (loaded, elapsed_ms) = app
        .report()
        .map(|r| (r.loaded.len(), r.elapsed_ms))
        .unwrap_or_default();

    println!();
    println!("══════════════════════════════════════════");
    println!("  {} 已就绪", app.name());
    println!("  模块:   {} 个", loaded);
    println!("  耗时:   {} ms", elapsed_ms);
    println!("  根目录: {}", app.root_dir().display());
    println!();
    println!("  按 Ctrl+C 退出");
    println!("══════════════════════════════════════════");
    println!();

    signal::ctrl_c().await?;
    info!("收到关闭信号，退出");
    Ok(ExitCode::SUCCESS)
}

/// 列出模块
async fn list_modules(options: &AppOptions) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let loader = options.build_loader()?;
    let manifests = loader.discover().await?;
    let order = DependencyGraphLoader::compute_order(&manifests)?;

    println!();
    println!("模块（按加载顺序）");
    println!("══════════════════════════════════════════");
    for (index, name) in order.iter().enumerate() {
        let Some(manifest) = manifests.iter().find(|m| &m.name == name) else {
            continue;
        };
        println!(
            "{:>3}. {} {}{}",
            index + 1,
            manifest.name,
            manifest.version,
            manifest
                .essential_type
                .as_ref()
                .map(|t| format!(" [{}]", t))
                .unwrap_or_default()
        );
        if let Some(description) = &manifest.description {
            println!("     {}", description);
        }
        if !manifest.dependencies.is_empty() {
            let deps: Vec<&str> = manifest.dependencies.iter().map(String::as_str).collect();
            println!("     依赖: {}", deps.join(", "));
        }
        if let Some(homepage) = &manifest.homepage {
            println!("     主页: {}", homepage);
        }
    }
    println!("══════════════════════════════════════════");
    println!();
    Ok(ExitCode::SUCCESS)
}

/// 检查模块描述
async fn check(options: &AppOptions) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let loader = options.build_loader()?;

    let manifests = match loader.discover().await {
        Ok(manifests) => manifests,
        Err(e) => {
            println!("❌ 模块发现失败: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    let order = match DependencyGraphLoader::compute_order(&manifests) {
        Ok(order) => order,
        Err(e) => {
            println!("❌ {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    println!("✅ 发现 {} 个模块", manifests.len());
    println!("   加载顺序: {}", order.join(" -> "));

    let capabilities = CapabilityTable::from_manifests(&manifests);
    for tag in capabilities.tags() {
        println!("   能力 {}: {}", tag, capabilities.providers(tag).join(", "));
    }
    Ok(ExitCode::SUCCESS)
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("chips-boot - 模块引导内核");
    println!("═══════════════════════════════════════");
    println!("  版本:     {}", chips_boot::VERSION);
    println!("  目标平台: {}", std::env::consts::ARCH);
    println!("  操作系统: {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}
