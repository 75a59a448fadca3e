//! 日志系统模块
//!
//! 基于 tracing 生态实现内核的日志输出：
//!
//! - 多级别日志与 EnvFilter 过滤
//! - 控制台输出（美化格式或 JSON 格式）
//! - 文件输出（异步非阻塞，按时间轮转）
//!
//! # 示例
//!
//! ```rust,no_run
//! use mosaic_core::utils::logger::{Logger, LoggerConfig, RotationStrategy};
//!
//! let config = LoggerConfig::builder()
//!     .level("debug")
//!     .json_format(true)
//!     .file_output("./logs")
//!     .rotation(RotationStrategy::Daily)
//!     .build();
//!
//! let _guard = Logger::init(config).unwrap();
//! tracing::info!(package = "acme/sales", "模块已安装");
//! ```

use crate::utils::error::{KernelError, Result};
use std::io;
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

// ============================================================================
// 日志轮转策略
// ============================================================================

/// 日志轮转策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RotationStrategy {
    /// 不轮转（单个日志文件）
    Never,
    /// 每小时轮转
    Hourly,
    /// 每天轮转（默认）
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

    /// 从字符串解析轮转策略，无法识别时回退到每天轮转
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "never" | "none" => RotationStrategy::Never,
            "hourly" | "hour" => RotationStrategy::Hourly,
            _ => RotationStrategy::Daily,
        }
    }
}

impl std::fmt::Display for RotationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RotationStrategy::Never => write!(f, "never"),
            RotationStrategy::Hourly => write!(f, "hourly"),
            RotationStrategy::Daily => write!(f, "daily"),
        }
    }
}

// ============================================================================
// 日志配置
// ============================================================================

/// 日志系统配置
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// 默认日志级别（"trace", "debug", "info", "warn", "error"）
    pub level: String,

    /// 是否使用 JSON 格式输出
    pub json_format: bool,

    /// 是否输出到控制台
    pub console_output: bool,

    /// 文件输出目录（None 表示不输出到文件）
    pub file_output: Option<PathBuf>,

    /// 日志文件名前缀
    pub file_prefix: String,

    /// 日志轮转策略
    pub rotation: RotationStrategy,

    /// 是否显示目标模块
    pub show_target: bool,

    /// 自定义过滤指令（EnvFilter 格式），例如 "mosaic_core::compiler=debug"
    pub filter_directives: Option<String>,

    /// 是否启用 ANSI 颜色
    pub ansi_colors: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            console_output: true,
            file_output: None,
            file_prefix: "mosaic".to_string(),
            rotation: RotationStrategy::Daily,
            show_target: true,
            filter_directives: None,
            ansi_colors: true,
        }
    }
}

impl LoggerConfig {
    /// 创建配置构建器
    pub fn builder() -> LoggerConfigBuilder {
        LoggerConfigBuilder::new()
    }

    /// 从内核配置的日志段创建
    pub fn from_log_config(log_config: &crate::core::config::LogConfig) -> Self {
        Self {
            level: log_config.level.clone(),
            json_format: log_config.json_format,
            file_output: if log_config.file_output {
                log_config.log_dir.clone()
            } else {
                None
            },
            rotation: RotationStrategy::parse(&log_config.rotation),
            ..Default::default()
        }
    }
}

/// 日志配置构建器
#[derive(Debug, Default)]
pub struct LoggerConfigBuilder {
    config: LoggerConfig,
}

impl LoggerConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置日志级别
    pub fn level(mut self, level: impl Into<String>) -> Self {
        self.config.level = level.into();
        self
    }

    /// 启用 JSON 格式输出
    pub fn json_format(mut self, enable: bool) -> Self {
        self.config.json_format = enable;
        self
    }

    /// 设置控制台输出
    pub fn console_output(mut self, enable: bool) -> Self {
        self.config.console_output = enable;
        self
    }

    /// 设置文件输出目录
    pub fn file_output(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.file_output = Some(dir.into());
        self
    }

    /// 设置日志文件前缀
    pub fn file_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.file_prefix = prefix.into();
        self
    }

    /// 设置轮转策略
    pub fn rotation(mut self, strategy: RotationStrategy) -> Self {
        self.config.rotation = strategy;
        self
    }

    /// 显示目标模块
    pub fn show_target(mut self, enable: bool) -> Self {
        self.config.show_target = enable;
        self
    }

    /// 设置过滤指令
    pub fn filter_directives(mut self, directives: impl Into<String>) -> Self {
        self.config.filter_directives = Some(directives.into());
        self
    }

    /// 启用 ANSI 颜色
    pub fn ansi_colors(mut self, enable: bool) -> Self {
        self.config.ansi_colors = enable;
        self
    }

    /// 构建配置
    pub fn build(self) -> LoggerConfig {
        self.config
    }
}

// ============================================================================
// 日志守卫
// ============================================================================

/// 日志系统守卫
///
/// 持有非阻塞写入器的 WorkerGuard，丢弃时等待挂起的日志写完。
#[derive(Default)]
pub struct LogGuard {
    _guards: Vec<WorkerGuard>,
}

impl LogGuard {
    fn push(&mut self, guard: WorkerGuard) {
        self._guards.push(guard);
    }
}

// ============================================================================
// 日志系统
// ============================================================================

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

type FilteredRegistry = tracing_subscriber::layer::Layered<EnvFilter, tracing_subscriber::Registry>;

/// 日志系统
pub struct Logger;

impl Logger {
    /// 初始化日志系统
    ///
    /// # Arguments
    ///
    /// * `config` - 日志配置
    ///
    /// # Returns
    ///
    /// 返回 `LogGuard`，必须保持存活直到程序退出
    ///
    /// # Errors
    ///
    /// 日志系统已初始化或全局订阅者设置失败时返回 `InitFailed`
    pub fn init(config: LoggerConfig) -> Result<LogGuard> {
        if LOGGER_INITIALIZED.get().is_some() {
            return Err(KernelError::InitFailed(
                "日志系统已初始化，不能重复初始化".to_string(),
            ));
        }

        let env_filter = Self::create_env_filter(&config);
        let mut guard = LogGuard::default();
        let mut layers: Vec<Box<dyn Layer<FilteredRegistry> + Send + Sync>> = Vec::new();

        if config.console_output {
            let (writer, console_guard) = tracing_appender::non_blocking(io::stdout());
            guard.push(console_guard);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(config.show_target);
            if config.json_format {
                layers.push(layer.json().with_ansi(false).boxed());
            } else {
                layers.push(layer.with_ansi(config.ansi_colors).boxed());
            }
        }

        if let Some(ref log_dir) = config.file_output {
            let appender = RollingFileAppender::new(
                config.rotation.to_rotation(),
                log_dir,
                format!("{}.log", config.file_prefix),
            );
            let (writer, file_guard) = tracing_appender::non_blocking(appender);
            guard.push(file_guard);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_target(config.show_target)
                .with_ansi(false);
            if config.json_format {
                layers.push(layer.json().boxed());
            } else {
                layers.push(layer.boxed());
            }
        }

        tracing_subscriber::registry()
            .with(env_filter)
            .with(layers)
            .try_init()
            .map_err(|e| KernelError::InitFailed(format!("设置全局日志订阅者失败: {}", e)))?;

        let _ = LOGGER_INITIALIZED.set(());
        Ok(guard)
    }

    /// 尝试初始化日志系统，已初始化时返回空守卫
    pub fn try_init(config: LoggerConfig) -> LogGuard {
        Self::init(config).unwrap_or_default()
    }

    /// 使用默认配置初始化日志系统
    pub fn init_default() -> Result<LogGuard> {
        Self::init(LoggerConfig::default())
    }

    /// 是否已初始化
    pub fn is_initialized() -> bool {
        LOGGER_INITIALIZED.get().is_some()
    }

    fn create_env_filter(config: &LoggerConfig) -> EnvFilter {
        // RUST_LOG 优先
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.level));

        match config.filter_directives {
            Some(ref directives) => directives
                .split(',')
                .filter_map(|d| d.trim().parse::<Directive>().ok())
                .fold(filter, |f, directive| f.add_directive(directive)),
            None => filter,
        }
    }
}

// ============================================================================
// 结构化字段
// ============================================================================

/// 结构化日志的标准字段名
pub mod fields {
    /// 模块包名
    pub const PACKAGE: &str = "package";
    /// 租户
    pub const TENANT: &str = "tenant";
    /// 逻辑名
    pub const LOGICAL_NAME: &str = "logical_name";
    /// 方法名
    pub const METHOD: &str = "method";
    /// 片段类型
    pub const FRAGMENT: &str = "fragment";
    /// 产物路径
    pub const ARTIFACT: &str = "artifact";
    /// 耗时（毫秒）
    pub const DURATION_MS: &str = "duration_ms";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotation_parse() {
        assert_eq!(RotationStrategy::parse("never"), RotationStrategy::Never);
        assert_eq!(RotationStrategy::parse("HOURLY"), RotationStrategy::Hourly);
        assert_eq!(RotationStrategy::parse("daily"), RotationStrategy::Daily);
        assert_eq!(RotationStrategy::parse("bogus"), RotationStrategy::Daily);
        assert_eq!(RotationStrategy::Hourly.to_string(), "hourly");
    }

    #[test]
    fn test_builder() {
        let config = LoggerConfig::builder()
            .level("debug")
            .json_format(true)
            .file_output("/tmp/mosaic-logs")
            .file_prefix("kernel")
            .rotation(RotationStrategy::Never)
            .build();

        assert_eq!(config.level, "debug");
        assert!(config.json_format);
        assert_eq!(config.file_output, Some(PathBuf::from("/tmp/mosaic-logs")));
        assert_eq!(config.file_prefix, "kernel");
        assert_eq!(config.rotation, RotationStrategy::Never);
    }

    #[test]
    fn test_from_log_config() {
        let log_config = crate::core::config::LogConfig {
            level: "warn".to_string(),
            json_format: true,
            file_output: false,
            log_dir: Some(PathBuf::from("./logs")),
            rotation: "hourly".to_string(),
        };
        let config = LoggerConfig::from_log_config(&log_config);

        assert_eq!(config.level, "warn");
        assert!(config.json_format);
        assert!(config.file_output.is_none());
        assert_eq!(config.rotation, RotationStrategy::Hourly);
    }

    #[test]
    fn test_try_init_twice() {
        let _first = Logger::try_init(LoggerConfig::builder().console_output(false).build());
        let _second = Logger::try_init(LoggerConfig::default());
        assert!(Logger::init_default().is_err() || Logger::is_initialized());
    }
}
