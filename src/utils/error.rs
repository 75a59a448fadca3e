//! 马赛克内核错误类型定义
//!
//! 本模块定义了内核中使用的所有错误类型。依赖解析、扩展管线、
//! 预编译器和模块生命周期共用同一个错误枚举。

use thiserror::Error;

/// 马赛克内核核心错误类型
#[derive(Error, Debug)]
pub enum KernelError {
    // ==================== 依赖解析错误 ====================

    /// 循环依赖
    #[error("检测到循环依赖: '{0}'")]
    CircularDependency(String),

    /// 依赖图中不存在该模块
    #[error("依赖图中不存在模块: '{0}'")]
    UnknownModule(String),

    /// 模块被已安装的模块依赖，无法直接卸载
    #[error("模块 '{module}' 被以下已安装模块依赖，无法卸载: {dependents:?}")]
    BlockedByDependents {
        /// 目标模块
        module: String,
        /// 阻止卸载的依赖者
        dependents: Vec<String>,
    },

    /// 依赖未找到
    #[error("依赖模块未找到: '{0}'")]
    DependencyNotFound(String),

    /// 版本不匹配
    #[error("版本不匹配: 模块 '{module}' 需要版本 {required}, 但找到版本 {found}")]
    VersionMismatch {
        /// 被依赖的模块
        module: String,
        /// 版本要求
        required: String,
        /// 实际版本
        found: String,
    },

    // ==================== 模块管理错误 ====================

    /// 模块未找到
    #[error("模块未找到: '{0}'")]
    ModuleNotFound(String),

    /// 模块已注册
    #[error("模块已注册: '{0}'")]
    ModuleAlreadyRegistered(String),

    /// 模块未安装
    #[error("模块 '{module}' 未在租户 {tenant:?} 下安装")]
    ModuleNotInstalled {
        /// 模块包名
        module: String,
        /// 租户
        tenant: Option<String>,
    },

    /// 依赖模块未启用
    #[error("模块 '{module}' 的依赖未安装或未启用: {inactive:?}")]
    InactiveDependencies {
        /// 目标模块
        module: String,
        /// 未启用的依赖
        inactive: Vec<String>,
    },

    /// 无效的模块元数据
    #[error("无效的模块元数据: {0}")]
    InvalidMetadata(String),

    // ==================== 扩展管线错误 ====================

    /// 管线中没有实现该方法的片段
    #[error("方法 '{method}' 不在逻辑实体 '{logical_name}' 的管线中")]
    MethodNotInPipeline {
        /// 方法名
        method: String,
        /// 逻辑名
        logical_name: String,
    },

    /// 逻辑名下没有注册任何扩展
    #[error("逻辑实体 '{0}' 没有注册任何扩展")]
    NoExtensions(String),

    // ==================== 预编译错误 ====================

    /// 单值属性冲突
    #[error("逻辑实体 '{logical_name}' 的属性 '{attribute}' 冲突: {existing} 与 {incoming}")]
    AttributeConflict {
        /// 逻辑名
        logical_name: String,
        /// 属性名
        attribute: String,
        /// 已有的值
        existing: String,
        /// 新片段声明的值
        incoming: String,
    },

    /// 属性值无效
    #[error("逻辑实体 '{logical_name}' 的属性 '{attribute}' 无效: {reason}")]
    InvalidAttribute {
        /// 逻辑名
        logical_name: String,
        /// 属性名
        attribute: String,
        /// 原因
        reason: String,
    },

    /// 跨模块引用
    #[error(
        "跨模块引用违反模块自治: 模块 '{module}' 引用了模块 '{foreign_module}' 的类型 '{type_name}'，\
         请在本模块中声明扩展 '{suggestion}' 的片段"
    )]
    ForeignReference {
        /// 引用方模块
        module: String,
        /// 被引用的类型
        type_name: String,
        /// 声明该类型的模块
        foreign_module: String,
        /// 建议扩展的生成别名
        suggestion: String,
    },

    /// 引用了未安装的模块
    #[error("模块 '{module}' 引用了未安装模块 '{missing_module}' 的类型 '{type_name}'")]
    UnavailableModuleReference {
        /// 引用方模块
        module: String,
        /// 被引用的类型
        type_name: String,
        /// 缺失的依赖模块
        missing_module: String,
    },

    /// 产物无法加载
    #[error("生成产物无效: {0}")]
    InvalidArtifact(String),

    /// 编译失败
    #[error("逻辑实体 '{logical_name}' 编译失败: {reason}")]
    CompileFailed {
        /// 逻辑名
        logical_name: String,
        /// 原因
        reason: String,
    },

    // ==================== 配置错误 ====================

    /// 配置加载失败
    #[error("配置加载失败: {0}")]
    ConfigLoadFailed(String),

    /// 配置值无效
    #[error("配置值无效: '{key}' - {reason}")]
    InvalidConfigValue {
        /// 配置键
        key: String,
        /// 原因
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

    /// 版本解析错误
    #[error("版本解析错误: {0}")]
    VersionParse(#[from] semver::Error),

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

/// 内核操作结果类型别名
pub type Result<T> = std::result::Result<T, KernelError>;

/// 错误码常量
pub mod error_code {
    // 依赖错误 (DEPENDENCY-xxx)
    /// 循环依赖
    pub const DEPENDENCY_CIRCULAR: &str = "DEPENDENCY-001";

    /// 依赖图中不存在的节点
    pub const DEPENDENCY_UNKNOWN_MODULE: &str = "DEPENDENCY-002";

    /// 卸载被依赖者阻止
    pub const DEPENDENCY_BLOCKED: &str = "DEPENDENCY-003";

    /// 依赖的模块不存在
    pub const DEPENDENCY_NOT_FOUND: &str = "DEPENDENCY-004";

    /// 依赖版本不满足要求
    pub const DEPENDENCY_VERSION_MISMATCH: &str = "DEPENDENCY-005";

    // 模块错误 (MODULE-xxx)
    /// 模块不存在
    pub const MODULE_NOT_FOUND: &str = "MODULE-001";

    /// 模块已注册
    pub const MODULE_ALREADY_REGISTERED: &str = "MODULE-002";

    /// 模块未安装
    pub const MODULE_NOT_INSTALLED: &str = "MODULE-003";

    /// 依赖未安装或未启用
    pub const MODULE_INACTIVE_DEPENDENCIES: &str = "MODULE-004";

    /// 模块清单无效
    pub const MODULE_INVALID_METADATA: &str = "MODULE-005";

    // 管线错误 (PIPELINE-xxx)
    /// 管线中没有该方法
    pub const PIPELINE_METHOD_NOT_FOUND: &str = "PIPELINE-001";

    /// 逻辑名下没有任何片段
    pub const PIPELINE_NO_EXTENSIONS: &str = "PIPELINE-002";

    // 编译错误 (COMPILER-xxx)
    /// 单值属性冲突
    pub const COMPILER_ATTRIBUTE_CONFLICT: &str = "COMPILER-001";

    /// 属性值类型无效
    pub const COMPILER_INVALID_ATTRIBUTE: &str = "COMPILER-002";

    /// 引用了其他模块的具体类型
    pub const COMPILER_FOREIGN_REFERENCE: &str = "COMPILER-003";

    /// 引用了未安装模块的类型
    pub const COMPILER_UNAVAILABLE_MODULE: &str = "COMPILER-004";

    /// 产物损坏或格式不符
    pub const COMPILER_INVALID_ARTIFACT: &str = "COMPILER-005";

    /// 编译失败
    pub const COMPILER_FAILED: &str = "COMPILER-006";

    // 配置错误 (CONFIG-xxx)
    /// 配置加载失败
    pub const CONFIG_LOAD_FAILED: &str = "CONFIG-001";

    /// 配置值无效
    pub const CONFIG_INVALID_VALUE: &str = "CONFIG-002";

    // 核心错误 (CORE-xxx)
    /// IO 错误
    pub const CORE_IO: &str = "CORE-001";

    /// 序列化或版本解析错误
    pub const CORE_SERIALIZATION: &str = "CORE-002";

    /// 初始化失败
    pub const CORE_INIT_FAILED: &str = "CORE-003";

    /// 内部错误
    pub const CORE_INTERNAL: &str = "CORE-004";
}

impl KernelError {
    /// 获取错误码
    pub fn error_code(&self) -> &'static str {
        match self {
            KernelError::CircularDependency(_) => error_code::DEPENDENCY_CIRCULAR,
            KernelError::UnknownModule(_) => error_code::DEPENDENCY_UNKNOWN_MODULE,
            KernelError::BlockedByDependents { .. } => error_code::DEPENDENCY_BLOCKED,
            KernelError::DependencyNotFound(_) => error_code::DEPENDENCY_NOT_FOUND,
            KernelError::VersionMismatch { .. } => error_code::DEPENDENCY_VERSION_MISMATCH,
            KernelError::ModuleNotFound(_) => error_code::MODULE_NOT_FOUND,
            KernelError::ModuleAlreadyRegistered(_) => error_code::MODULE_ALREADY_REGISTERED,
            KernelError::ModuleNotInstalled { .. } => error_code::MODULE_NOT_INSTALLED,
            KernelError::InactiveDependencies { .. } => error_code::MODULE_INACTIVE_DEPENDENCIES,
            KernelError::InvalidMetadata(_) => error_code::MODULE_INVALID_METADATA,
            KernelError::MethodNotInPipeline { .. } => error_code::PIPELINE_METHOD_NOT_FOUND,
            KernelError::NoExtensions(_) => error_code::PIPELINE_NO_EXTENSIONS,
            KernelError::AttributeConflict { .. } => error_code::COMPILER_ATTRIBUTE_CONFLICT,
            KernelError::InvalidAttribute { .. } => error_code::COMPILER_INVALID_ATTRIBUTE,
            KernelError::ForeignReference { .. } => error_code::COMPILER_FOREIGN_REFERENCE,
            KernelError::UnavailableModuleReference { .. } => error_code::COMPILER_UNAVAILABLE_MODULE,
            KernelError::InvalidArtifact(_) => error_code::COMPILER_INVALID_ARTIFACT,
            KernelError::CompileFailed { .. } => error_code::COMPILER_FAILED,
            KernelError::ConfigLoadFailed(_) => error_code::CONFIG_LOAD_FAILED,
            KernelError::InvalidConfigValue { .. } => error_code::CONFIG_INVALID_VALUE,
            KernelError::Io(_) => error_code::CORE_IO,
            KernelError::Json(_) | KernelError::Yaml(_) | KernelError::VersionParse(_) => {
                error_code::CORE_SERIALIZATION
            }
            KernelError::InitFailed(_) => error_code::CORE_INIT_FAILED,
            KernelError::Internal(_) | KernelError::Other(_) => error_code::CORE_INTERNAL,
        }
    }

    /// 调用方是否可以通过回退逻辑恢复
    ///
    /// 管线未命中应回退到原生实现；被依赖阻止的卸载可以改用级联模式。
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            KernelError::MethodNotInPipeline { .. }
                | KernelError::NoExtensions(_)
                | KernelError::BlockedByDependents { .. }
        )
    }

    /// 是否属于单个逻辑实体的编译错误
    ///
    /// 批量编译的宽容模式下，这类错误只影响当前逻辑实体。
    pub fn is_compile_scoped(&self) -> bool {
        matches!(
            self,
            KernelError::AttributeConflict { .. }
                | KernelError::InvalidAttribute { .. }
                | KernelError::ForeignReference { .. }
                | KernelError::UnavailableModuleReference { .. }
                | KernelError::CompileFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = KernelError::CircularDependency("acme/sales".to_string());
        assert!(err.to_string().contains("acme/sales"));

        let err = KernelError::BlockedByDependents {
            module: "acme/base".to_string(),
            dependents: vec!["acme/sales".to_string()],
        };
        let message = err.to_string();
        assert!(message.contains("acme/base"));
        assert!(message.contains("acme/sales"));
    }

    #[test]
    fn test_error_code() {
        let err = KernelError::MethodNotInPipeline {
            method: "price".to_string(),
            logical_name: "Widget".to_string(),
        };
        assert_eq!(err.error_code(), error_code::PIPELINE_METHOD_NOT_FOUND);

        let err = KernelError::UnknownModule("ghost".to_string());
        assert_eq!(err.error_code(), error_code::DEPENDENCY_UNKNOWN_MODULE);
    }

    #[test]
    fn test_recoverable() {
        let err = KernelError::MethodNotInPipeline {
            method: "price".to_string(),
            logical_name: "Widget".to_string(),
        };
        assert!(err.is_recoverable());
        assert!(!KernelError::CircularDependency("a".to_string()).is_recoverable());
    }

    #[test]
    fn test_compile_scoped() {
        let err = KernelError::AttributeConflict {
            logical_name: "Widget".to_string(),
            attribute: "table".to_string(),
            existing: "\"a\"".to_string(),
            incoming: "\"b\"".to_string(),
        };
        assert!(err.is_compile_scoped());
        assert!(!KernelError::Internal("x".to_string()).is_compile_scoped());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: KernelError = io_err.into();
        assert!(matches!(err, KernelError::Io(_)));
        assert_eq!(err.error_code(), error_code::CORE_IO);
    }
}
