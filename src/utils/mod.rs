//! 工具模块
//!
//! 包含错误类型、临时文件命名、原子写入与日志系统。

pub mod error;
pub mod fs;
pub mod id;
pub mod logger;

pub use error::{error_code, KernelError, Result};
pub use fs::{modified_time, system_time_millis, write_atomic};
pub use id::{generate_suffix, is_temp_path, temp_path_for};
pub use logger::{fields, LogGuard, Logger, LoggerConfig, LoggerConfigBuilder, RotationStrategy};
