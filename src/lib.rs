//! # Mosaic Core - 马赛克模块内核
//!
//! 让多个独立安装的模块共同扩展同一个逻辑实体，而不必互相引用：
//!
//! - **模块系统**: 清单扫描、依赖解析、按租户的安装状态与生命周期
//! - **扩展管线**: 同一逻辑名下的片段按注册顺序倒序串联，显式委托给上一层
//! - **预编译器**: 把管线压平为磁盘产物，并在编译期检查模块隔离
//! - **日志系统**: 基于 tracing 的结构化日志
//!
//! ## 快速开始
//!
//! ```rust,no_run
//! use mosaic_core::{Kernel, KernelConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = KernelConfig::builder().module_dir("modules").build();
//!     let kernel = Kernel::new(config).await?;
//!     kernel.boot(None).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## 模块结构
//!
//! - `module` - 模块元数据、依赖解析、注册表与生命周期
//! - `pipeline` - 片段、注册表与解释执行的分发
//! - `compiler` - 产物生成、过期检测与隔离检查
//! - `core` - 内核配置
//! - `utils` - 错误类型、文件工具与日志
//! - `api` - 内核入口

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod api;
pub mod compiler;
pub mod core;
pub mod module;
pub mod pipeline;
pub mod utils;

// 重导出常用类型，方便使用
pub use api::{Kernel, KernelState, ModuleEntry, RegistrationContext};

pub use module::{
    Dependency, ModuleInfo, ModuleLifecycleManager, ModuleMetadata, ModuleRegistry, ModuleState,
    ModuleStateStore,
};

pub use pipeline::{
    DomainType, Entity, ExtensionRegistry, Fragment, FragmentBuilder, LogicalName, Next,
    PipelineRuntime, Visibility,
};

pub use compiler::{CompileOutcome, CompileReport, CompiledPipeline, PipelineCompiler};

pub use utils::{error_code, KernelError, Result};
pub use utils::logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};

pub use core::config::{CompilerConfig, KernelConfig, KernelConfigBuilder, LogConfig, ModuleConfig};

/// 库版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
