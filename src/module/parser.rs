//! 模块元数据解析器
//!
//! 负责从 module.yaml 文件解析模块元数据。

use std::path::Path;

use crate::module::metadata::ModuleMetadata;
use crate::utils::error::{KernelError, Result};

/// 模块描述文件名
pub const MANIFEST_FILE: &str = "module.yaml";

/// 模块元数据解析器
#[derive(Debug, Clone, Default)]
pub struct ModuleParser;

impl ModuleParser {
    /// 从文件解析模块元数据
    ///
    /// # Arguments
    ///
    /// * `path` - module.yaml 文件路径
    ///
    /// # Errors
    ///
    /// - 文件不存在或无法读取时返回 IO 错误
    /// - 文件内容不符合 YAML 格式时返回 YAML 错误
    /// - 元数据验证失败时返回 `InvalidMetadata` 错误
    pub async fn parse_file(path: &Path) -> Result<ModuleMetadata> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse_string(&content)
    }

    /// 从文件同步解析模块元数据
    pub fn parse_file_sync(path: &Path) -> Result<ModuleMetadata> {
        let content = std::fs::read_to_string(path)?;
        Self::parse_string(&content)
    }

    /// 从字符串解析模块元数据
    ///
    /// 解析后补全缺省的短名、命名空间和入口句柄，再执行校验。
    pub fn parse_string(content: &str) -> Result<ModuleMetadata> {
        let mut metadata: ModuleMetadata = serde_yaml::from_str(content)?;
        metadata.fill_defaults();
        Self::validate(&metadata)?;
        Ok(metadata)
    }

    /// 验证模块元数据
    ///
    /// 收集全部问题后合并为一个 `InvalidMetadata` 错误：
    /// - 元数据自身的字段与版本校验
    /// - 包名格式（`vendor/name` 或单段名）
    /// - 依赖包名格式
    /// - 抽象类型必须位于本模块命名空间下
    pub fn validate(metadata: &ModuleMetadata) -> Result<()> {
        let mut errors = metadata.validate().err().unwrap_or_default();

        if !metadata.package.is_empty() && !Self::is_valid_package(&metadata.package) {
            errors.push(format!(
                "包名 '{}' 格式无效，应为 vendor/name 形式且只包含字母、数字、下划线、点和连字符",
                metadata.package
            ));
        }

        for (index, dep) in metadata.dependencies.iter().enumerate() {
            if dep.package.is_empty() {
                errors.push(format!("第 {} 个依赖的包名不能为空", index + 1));
            } else if !Self::is_valid_package(&dep.package) {
                errors.push(format!("依赖包名 '{}' 格式无效", dep.package));
            }
        }

        for ty in &metadata.abstract_types {
            if !metadata.owns_type(ty) {
                errors.push(format!(
                    "抽象类型 '{}' 不在模块命名空间 '{}' 下",
                    ty, metadata.namespace
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(KernelError::InvalidMetadata(format!(
                "{}: {}",
                metadata.package,
                errors.join("; ")
            )))
        }
    }

    fn is_valid_package(package: &str) -> bool {
        let segments: Vec<&str> = package.split('/').collect();
        segments.len() <= 2
            && segments.iter().all(|seg| {
                !seg.is_empty()
                    && seg
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            })
    }
}
