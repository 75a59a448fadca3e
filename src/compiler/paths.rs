//! 生成产物路径约定

use std::path::{Path, PathBuf};

use crate::pipeline::{DomainType, LogicalName};

/// 产物文件扩展名
pub const ARTIFACT_EXTENSION: &str = "json";

/// 生成产物路径
///
/// 布局为 `<cache_root>/<domain>/<逻辑名相对路径>.json`，
/// 生成类型路径为 `<generated_namespace>::<domain>::<逻辑名>`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedPaths {
    cache_root: PathBuf,
    generated_namespace: String,
}

impl GeneratedPaths {
    /// 创建路径约定
    pub fn new(cache_root: impl Into<PathBuf>, generated_namespace: impl Into<String>) -> Self {
        Self {
            cache_root: cache_root.into(),
            generated_namespace: generated_namespace.into(),
        }
    }

    /// 缓存根目录
    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// 生成命名空间根
    pub fn generated_namespace(&self) -> &str {
        &self.generated_namespace
    }

    /// 领域目录
    pub fn domain_dir(&self, domain: DomainType) -> PathBuf {
        self.cache_root.join(domain.as_str())
    }

    /// 领域命名空间，例如 `mosaic::models`
    pub fn domain_namespace(&self, domain: DomainType) -> String {
        format!("{}::{}", self.generated_namespace, domain.as_str())
    }

    /// 逻辑名对应的产物文件
    ///
    /// ```rust
    /// use mosaic_core::compiler::GeneratedPaths;
    /// use mosaic_core::pipeline::{DomainType, LogicalName};
    /// use std::path::PathBuf;
    ///
    /// let paths = GeneratedPaths::new("/cache", "mosaic");
    /// let name = LogicalName::new("catalog/product");
    /// assert_eq!(
    ///     paths.artifact_path(DomainType::Models, &name),
    ///     PathBuf::from("/cache/models/Catalog/Product.json")
    /// );
    /// ```
    pub fn artifact_path(&self, domain: DomainType, logical_name: &LogicalName) -> PathBuf {
        let mut path = self.domain_dir(domain).join(logical_name.relative_path());
        path.set_extension(ARTIFACT_EXTENSION);
        path
    }

    /// 逻辑名对应的生成类型路径
    pub fn generated_type_path(&self, domain: DomainType, logical_name: &LogicalName) -> String {
        format!("{}::{}", self.domain_namespace(domain), logical_name)
    }
}
