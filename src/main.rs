//! Mosaic 命令行入口
//!
//! 管理模块安装状态和预编译产物缓存。
//!
//! # 命令概览
//!
//! - `compile` / `compile-one` - 编译全部或单个逻辑实体
//! - `clear-compiled` - 清除产物缓存
//! - `install` / `uninstall` / `enable` / `disable` / `upgrade` - 模块生命周期
//! - `list` - 列出模块及其状态
//! - `check-config` - 验证配置文件
//! - `version` - 显示版本信息
//!
//! # 使用示例
//!
//! ```bash
//! mosaic -c mosaic.yaml install acme/sales --tenant shop1
//! mosaic uninstall acme/base --cascade --dry-run
//! mosaic compile --lazy
//! ```
//!
//! 片段由宿主程序通过 `ModuleEntry` 注册；本工具不注册任何入口，
//! 编译命令只处理引导期间已注册的逻辑实体。

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;

use mosaic_core::{Kernel, KernelConfig, Logger, LoggerConfig};

/// Mosaic - 模块内核
#[derive(Parser)]
#[command(name = "mosaic")]
#[command(version, about = "模块依赖解析、扩展管线与预编译", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "mosaic.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, global = true, env = "MOSAIC_LOG_LEVEL")]
    log_level: Option<String>,

    /// 子命令
    #[command(subcommand)]
    command: Commands,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 编译全部逻辑实体
    Compile {
        /// 跳过仍然新鲜的产物
        #[arg(long)]
        lazy: bool,

        /// 单个实体失败时继续编译其余实体
        #[arg(long)]
        graceful: bool,
    },

    /// 编译单个逻辑实体
    CompileOne {
        /// 逻辑名
        name: String,

        /// 产物仍然新鲜时跳过
        #[arg(long)]
        lazy: bool,
    },

    /// 清除产物缓存
    ClearCompiled,

    /// 安装模块及其依赖
    Install {
        /// 包名
        package: String,
        /// 租户
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// 卸载模块
    Uninstall {
        /// 包名
        package: String,
        /// 租户
        #[arg(short, long)]
        tenant: Option<String>,
        /// 级联卸载全部依赖者
        #[arg(long)]
        cascade: bool,
        /// 只显示卸载计划
        #[arg(long)]
        dry_run: bool,
    },

    /// 启用模块
    Enable {
        /// 包名
        package: String,
        /// 租户
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// 停用模块
    Disable {
        /// 包名
        package: String,
        /// 租户
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// 把安装记录升级到当前注册的版本
    Upgrade {
        /// 包名
        package: String,
        /// 租户
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// 列出模块及其状态
    List {
        /// 租户
        #[arg(short, long)]
        tenant: Option<String>,
    },

    /// 验证配置文件
    CheckConfig,

    /// 查看版本信息
    Version,
}

/// 加载配置文件，不存在时使用默认配置
async fn load_config(path: &Path, log_level: Option<String>) -> anyhow::Result<KernelConfig> {
    let mut config = if path.exists() {
        KernelConfig::from_file(path)
            .await
            .with_context(|| format!("加载配置文件 {} 失败", path.display()))?
    } else {
        KernelConfig::default()
    };
    config.apply_env();
    if let Some(level) = log_level {
        config.logging.level = level;
    }
    Ok(config)
}

fn print_version() {
    println!("Mosaic - 模块内核");
    println!("  版本:     {}", mosaic_core::VERSION);
    println!("  目标平台: {}", std::env::consts::ARCH);
    println!("  操作系统: {}", std::env::consts::OS);
}

fn print_config(config: &KernelConfig) {
    println!("  [日志]");
    println!("    级别:         {}", config.logging.level);
    println!("    JSON 格式:    {}", config.logging.json_format);
    println!("  [模块]");
    println!("    模块目录:     {:?}", config.modules.module_dirs);
    println!("    可用目录:     {:?}", config.modules.available_dirs);
    println!("    状态文件:     {}", config.modules.state_file.display());
    println!("  [预编译]");
    println!("    产物目录:     {}", config.compiler.cache_root.display());
    println!("    生成命名空间: {}", config.compiler.generated_namespace);
    println!("    共享命名空间: {:?}", config.shared_namespaces());
}

fn print_plan(title: &str, packages: &[String]) {
    if packages.is_empty() {
        println!("{}: 无", title);
        return;
    }
    println!("{}:", title);
    for package in packages {
        println!("  - {}", package);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        print_version();
        return Ok(());
    }

    let mut config = load_config(&cli.config, cli.log_level).await?;

    if let Commands::CheckConfig = cli.command {
        config.validate()?;
        println!("配置有效: {}", cli.config.display());
        print_config(&config);
        return Ok(());
    }

    let _guard = Logger::init(LoggerConfig::from_log_config(&config.logging))?;

    if let Commands::Compile { graceful: true, .. } = cli.command {
        config.compiler.graceful = true;
    }

    let kernel = Kernel::new(config).await?;
    kernel.modules().scan().await?;

    match cli.command {
        Commands::Compile { lazy, .. } => {
            kernel.boot(None).await?;
            let report = kernel.compile_all(lazy).await?;
            for (name, path) in &report.compiled {
                println!("已编译 {} -> {}", name, path.display());
            }
            for (name, _) in &report.skipped {
                println!("已是最新 {}", name);
            }
            for (name, error) in &report.failed {
                println!("失败 {}: {}", name, error);
            }
            if !report.is_success() {
                anyhow::bail!("{} 个逻辑实体编译失败", report.failed.len());
            }
        }
        Commands::CompileOne { name, lazy } => {
            kernel.boot(None).await?;
            let outcome = kernel.compile_single(&name, lazy).await?;
            println!("{:?}", outcome);
        }
        Commands::ClearCompiled => {
            let removed = kernel.clear_compiled().await?;
            println!("{}", if removed { "产物缓存已清除" } else { "产物缓存不存在" });
        }
        Commands::Install { package, tenant } => {
            let installed = kernel.install(&package, tenant.as_deref()).await?;
            print_plan("新安装", &installed);
        }
        Commands::Uninstall { package, tenant, cascade, dry_run } => {
            let plan = kernel
                .uninstall(&package, tenant.as_deref(), cascade, dry_run)
                .await?;
            print_plan(if dry_run { "卸载计划" } else { "已卸载" }, &plan);
        }
        Commands::Enable { package, tenant } => {
            kernel.enable(&package, tenant.as_deref()).await?;
            println!("已启用 {}", package);
        }
        Commands::Disable { package, tenant } => {
            kernel.disable(&package, tenant.as_deref()).await?;
            println!("已停用 {}", package);
        }
        Commands::Upgrade { package, tenant } => {
            let state = kernel.upgrade(&package, tenant.as_deref()).await?;
            println!("已升级 {} 到 {}", package, state.version);
        }
        Commands::List { tenant } => {
            let installed = kernel.modules().installed(tenant.as_deref()).await?;
            for module in kernel.modules().list().await {
                let status = match installed.get(module.package()) {
                    Some(state) if state.enabled => "已启用",
                    Some(_) => "已停用",
                    None => "未安装",
                };
                println!("{:<32} {:<10} {}", module.package(), module.version(), status);
            }
        }
        Commands::CheckConfig | Commands::Version => {}
    }

    info!("命令执行完成");
    Ok(())
}
