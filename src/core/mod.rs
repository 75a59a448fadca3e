//! 核心模块
//!
//! 包含内核配置。

pub mod config;

pub use config::{
    CompilerConfig, KernelConfig, KernelConfigBuilder, LogConfig, ModuleConfig, ENV_CACHE_ROOT,
    ENV_LOG_LEVEL,
};
