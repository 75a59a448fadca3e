//! 内核配置
//!
//! 定义内核的配置结构和加载逻辑。配置文件支持 YAML 与 JSON，
//! 按扩展名选择解析器；部分配置项可由环境变量覆盖。

use crate::utils::error::{KernelError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// 日志级别环境变量
pub const ENV_LOG_LEVEL: &str = "MOSAIC_LOG_LEVEL";

/// 生成产物缓存目录环境变量
pub const ENV_CACHE_ROOT: &str = "MOSAIC_CACHE_ROOT";

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: String,

    /// 是否输出 JSON 格式
    #[serde(default)]
    pub json_format: bool,

    /// 是否输出到文件
    #[serde(default)]
    pub file_output: bool,

    /// 日志文件目录
    #[serde(default)]
    pub log_dir: Option<PathBuf>,

    /// 日志轮转策略
    #[serde(default = "default_rotation")]
    pub rotation: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_output: false,
            log_dir: None,
            rotation: default_rotation(),
        }
    }
}

/// 模块管理配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleConfig {
    /// 已安装模块目录列表（扫描其中的 `*/module.yaml`）
    #[serde(default)]
    pub module_dirs: Vec<PathBuf>,

    /// 可用但尚未安装的模块目录列表
    #[serde(default)]
    pub available_dirs: Vec<PathBuf>,

    /// 模块状态持久化文件
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,

    /// 默认租户
    #[serde(default)]
    pub default_tenant: Option<String>,
}

fn default_state_file() -> PathBuf {
    PathBuf::from("storage/modules.json")
}

impl Default for ModuleConfig {
    fn default() -> Self {
        Self {
            module_dirs: vec![],
            available_dirs: vec![],
            state_file: default_state_file(),
            default_tenant: None,
        }
    }
}

/// 预编译器配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompilerConfig {
    /// 生成产物根目录
    #[serde(default = "default_cache_root")]
    pub cache_root: PathBuf,

    /// 生成类型的命名空间根，例如 `mosaic::models::Product`
    #[serde(default = "default_generated_namespace")]
    pub generated_namespace: String,

    /// 内核运行时命名空间，片段可以自由引用
    #[serde(default = "default_core_namespace")]
    pub core_namespace: String,

    /// 额外的共享命名空间
    #[serde(default)]
    pub shared_namespaces: Vec<String>,

    /// 批量编译时是否跳过失败的逻辑实体继续编译
    #[serde(default = "default_true")]
    pub graceful: bool,
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("storage/mosaic")
}

fn default_generated_namespace() -> String {
    "mosaic".to_string()
}

fn default_core_namespace() -> String {
    "mosaic_core".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            cache_root: default_cache_root(),
            generated_namespace: default_generated_namespace(),
            core_namespace: default_core_namespace(),
            shared_namespaces: vec![],
            graceful: true,
        }
    }
}

/// 内核配置
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KernelConfig {
    /// 配置文件路径
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    /// 日志配置
    #[serde(default)]
    pub logging: LogConfig,

    /// 模块管理配置
    #[serde(default)]
    pub modules: ModuleConfig,

    /// 预编译器配置
    #[serde(default)]
    pub compiler: CompilerConfig,

    /// 是否为开发模式
    #[serde(default)]
    pub dev_mode: bool,
}

impl KernelConfig {
    /// 创建配置构建器
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::new()
    }

    /// 从文件加载配置
    ///
    /// `.json` 文件按 JSON 解析，其余按 YAML 解析。
    pub async fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = tokio::fs::read_to_string(&path).await.map_err(|e| {
            KernelError::ConfigLoadFailed(format!("读取 {} 失败: {}", path.display(), e))
        })?;

        let mut config = Self::parse(&content, &path)?;
        config.config_path = Some(path);
        Ok(config)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        let is_json = path.extension().map(|e| e == "json").unwrap_or(false);
        let parsed = if is_json {
            serde_json::from_str(content).map_err(|e| e.to_string())
        } else {
            serde_yaml::from_str(content).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| {
            KernelError::ConfigLoadFailed(format!("解析 {} 失败: {}", path.display(), e))
        })
    }

    /// 应用环境变量覆盖
    pub fn apply_env(&mut self) {
        if let Ok(level) = std::env::var(ENV_LOG_LEVEL) {
            if !level.trim().is_empty() {
                self.logging.level = level;
            }
        }
        if let Ok(root) = std::env::var(ENV_CACHE_ROOT) {
            if !root.trim().is_empty() {
                self.compiler.cache_root = PathBuf::from(root);
            }
        }
    }

    /// 校验配置
    ///
    /// 返回遇到的第一个无效项。
    pub fn validate(&self) -> Result<()> {
        const LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
        if !LEVELS.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(KernelError::InvalidConfigValue {
                key: "logging.level".to_string(),
                reason: format!("不支持的日志级别 '{}'", self.logging.level),
            });
        }
        if self.logging.file_output && self.logging.log_dir.is_none() {
            return Err(KernelError::InvalidConfigValue {
                key: "logging.log_dir".to_string(),
                reason: "启用文件日志时必须指定目录".to_string(),
            });
        }
        if self.compiler.cache_root.as_os_str().is_empty() {
            return Err(KernelError::InvalidConfigValue {
                key: "compiler.cache_root".to_string(),
                reason: "不能为空".to_string(),
            });
        }
        if !is_namespace_path(&self.compiler.generated_namespace) {
            return Err(KernelError::InvalidConfigValue {
                key: "compiler.generated_namespace".to_string(),
                reason: format!("'{}' 不是合法的命名空间", self.compiler.generated_namespace),
            });
        }
        if let Some(bad) = self
            .compiler
            .shared_namespaces
            .iter()
            .find(|ns| !is_namespace_path(ns))
        {
            return Err(KernelError::InvalidConfigValue {
                key: "compiler.shared_namespaces".to_string(),
                reason: format!("'{}' 不是合法的命名空间", bad),
            });
        }
        Ok(())
    }

    /// 合并另一个配置（用于覆盖）
    pub fn merge(&mut self, other: KernelConfig) {
        if other.logging.level != default_log_level() {
            self.logging.level = other.logging.level;
        }
        if other.logging.file_output {
            self.logging.file_output = true;
            self.logging.log_dir = other.logging.log_dir;
        }
        self.modules.module_dirs.extend(other.modules.module_dirs);
        self.modules.available_dirs.extend(other.modules.available_dirs);
        if other.modules.state_file != default_state_file() {
            self.modules.state_file = other.modules.state_file;
        }
        if other.modules.default_tenant.is_some() {
            self.modules.default_tenant = other.modules.default_tenant;
        }
        if other.compiler.cache_root != default_cache_root() {
            self.compiler.cache_root = other.compiler.cache_root;
        }
        self.compiler
            .shared_namespaces
            .extend(other.compiler.shared_namespaces);
        if other.dev_mode {
            self.dev_mode = true;
        }
    }

    /// 全部共享命名空间：生成的 models/policies 命名空间、内核命名空间与额外配置项
    pub fn shared_namespaces(&self) -> Vec<String> {
        let root = &self.compiler.generated_namespace;
        let mut namespaces = vec![
            format!("{}::models", root),
            format!("{}::policies", root),
            self.compiler.core_namespace.clone(),
        ];
        namespaces.extend(self.compiler.shared_namespaces.iter().cloned());
        namespaces
    }
}

fn is_namespace_path(ns: &str) -> bool {
    !ns.is_empty()
        && ns.split("::").all(|seg| {
            let mut chars = seg.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        })
}

/// 配置构建器
#[derive(Debug, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// 创建新的构建器
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置日志级别
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    /// 启用文件日志
    pub fn file_logging(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.config.logging.file_output = true;
        self.config.logging.log_dir = Some(log_dir.into());
        self
    }

    /// 启用 JSON 格式日志
    pub fn json_logging(mut self) -> Self {
        self.config.logging.json_format = true;
        self
    }

    /// 添加已安装模块目录
    pub fn module_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.modules.module_dirs.push(dir.into());
        self
    }

    /// 添加可用模块目录
    pub fn available_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.modules.available_dirs.push(dir.into());
        self
    }

    /// 设置模块状态文件
    pub fn state_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.modules.state_file = path.into();
        self
    }

    /// 设置默认租户
    pub fn default_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.config.modules.default_tenant = Some(tenant.into());
        self
    }

    /// 设置生成产物根目录
    pub fn cache_root(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.compiler.cache_root = dir.into();
        self
    }

    /// 设置生成命名空间根
    pub fn generated_namespace(mut self, ns: impl Into<String>) -> Self {
        self.config.compiler.generated_namespace = ns.into();
        self
    }

    /// 添加共享命名空间
    pub fn shared_namespace(mut self, ns: impl Into<String>) -> Self {
        self.config.compiler.shared_namespaces.push(ns.into());
        self
    }

    /// 设置批量编译的宽容模式
    pub fn graceful(mut self, graceful: bool) -> Self {
        self.config.compiler.graceful = graceful;
        self
    }

    /// 启用开发模式
    pub fn dev_mode(mut self) -> Self {
        self.config.dev_mode = true;
        self
    }

    /// 构建配置
    pub fn build(self) -> KernelConfig {
        self.config
    }
}
