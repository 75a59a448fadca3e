//! 模块元数据定义
//!
//! 定义模块描述文件 (module.yaml) 中的数据结构。

use chrono::{DateTime, Utc};
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// 依赖声明
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    /// 依赖模块包名
    pub package: String,

    /// 版本要求（semver 格式）
    #[serde(default = "default_version_req")]
    pub version: String,

    /// 是否为可选依赖
    #[serde(default)]
    pub optional: bool,
}

fn default_version_req() -> String {
    "*".to_string()
}

impl Dependency {
    /// 创建必需依赖
    pub fn new(package: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            package: package.into(),
            version: version.into(),
            optional: false,
        }
    }

    /// 设置为可选依赖
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// 检查版本是否满足要求
    pub fn version_matches(&self, version: &Version) -> bool {
        VersionReq::parse(&self.version)
            .map(|req| req.matches(version))
            .unwrap_or(false)
    }
}

/// 模块元数据
///
/// 对应 module.yaml 文件中的配置。扫描后除依赖列表外不再变化。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleMetadata {
    /// 包名，例如 `acme/sales`
    pub package: String,

    /// 短名，缺省时由包名推导
    #[serde(default)]
    pub slug: String,

    /// 模块显示名称
    pub name: String,

    /// 源码命名空间根，例如 `acme_sales`
    #[serde(default)]
    pub namespace: String,

    /// 模块版本（semver 格式）
    pub version: String,

    /// 模块描述
    #[serde(default)]
    pub description: String,

    /// 入口点句柄，由宿主注册的 `ModuleEntry` 实现对应
    #[serde(default)]
    pub entry: String,

    /// 依赖声明
    #[serde(default)]
    pub dependencies: Vec<Dependency>,

    /// 本模块对外暴露的抽象类型，不受模块隔离检查约束
    #[serde(default)]
    pub abstract_types: Vec<String>,

    /// 自定义字段
    #[serde(default, flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ModuleMetadata {
    /// 创建新的模块元数据
    ///
    /// 短名与命名空间按包名推导。
    pub fn new(
        package: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let mut metadata = Self {
            package: package.into(),
            slug: String::new(),
            name: name.into(),
            namespace: String::new(),
            version: version.into(),
            description: String::new(),
            entry: String::new(),
            dependencies: vec![],
            abstract_types: vec![],
            extra: HashMap::new(),
        };
        metadata.fill_defaults();
        metadata
    }

    /// 设置命名空间
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// 设置入口点句柄
    pub fn with_entry(mut self, entry: impl Into<String>) -> Self {
        self.entry = entry.into();
        self
    }

    /// 添加依赖
    pub fn with_dependency(mut self, dependency: Dependency) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// 补全缺省的短名、命名空间和入口句柄
    pub fn fill_defaults(&mut self) {
        if self.slug.is_empty() {
            self.slug = derive_slug(&self.package);
        }
        if self.namespace.is_empty() {
            self.namespace = self.slug.replace('-', "_");
        }
        if self.entry.is_empty() {
            self.entry = self.package.clone();
        }
    }

    /// 解析版本号
    pub fn parsed_version(&self) -> Option<Version> {
        Version::parse(&self.version).ok()
    }

    /// 必需依赖的包名
    pub fn required_dependencies(&self) -> impl Iterator<Item = &str> {
        self.dependencies
            .iter()
            .filter(|d| !d.optional)
            .map(|d| d.package.as_str())
    }

    /// 类型路径是否位于本模块命名空间下
    pub fn owns_type(&self, type_path: &str) -> bool {
        !self.namespace.is_empty()
            && (type_path == self.namespace
                || type_path
                    .strip_prefix(&self.namespace)
                    .map(|rest| rest.starts_with("::"))
                    .unwrap_or(false))
    }

    /// 验证元数据有效性
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = vec![];

        if self.package.trim().is_empty() {
            errors.push("模块包名不能为空".to_string());
        }

        if self.name.trim().is_empty() {
            errors.push("模块名称不能为空".to_string());
        }

        if Version::parse(&self.version).is_err() {
            errors.push(format!("无效的版本号格式: {}", self.version));
        }

        if !self.namespace.is_empty()
            && !self
                .namespace
                .split("::")
                .all(|seg| !seg.is_empty() && seg.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'))
        {
            errors.push(format!("无效的命名空间: {}", self.namespace));
        }

        for dep in &self.dependencies {
            if dep.package == self.package {
                errors.push(format!("模块 {} 不能依赖自身", self.package));
            }
            if VersionReq::parse(&dep.version).is_err() {
                errors.push(format!(
                    "依赖 {} 的版本要求格式无效: {}",
                    dep.package, dep.version
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// 由包名推导短名：取最后一段并转为 kebab-case
///
/// `acme/SalesReports` → `sales-reports`
pub fn derive_slug(package: &str) -> String {
    let last = package.rsplit('/').next().unwrap_or(package);
    let mut slug = String::with_capacity(last.len() + 4);
    let mut prev_lower = false;
    for c in last.chars() {
        if c == '_' || c == ' ' || c == '.' || c == '-' {
            if !slug.ends_with('-') && !slug.is_empty() {
                slug.push('-');
            }
            prev_lower = false;
        } else if c.is_uppercase() {
            if prev_lower && !slug.ends_with('-') {
                slug.push('-');
            }
            slug.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            slug.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    slug.trim_end_matches('-').to_string()
}

/// 已发现模块的运行时信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleInfo {
    /// 模块元数据
    pub metadata: ModuleMetadata,

    /// 模块根目录
    pub path: PathBuf,

    /// 发现时间
    pub discovered_at: DateTime<Utc>,
}

impl ModuleInfo {
    /// 创建新的模块信息
    pub fn new(metadata: ModuleMetadata, path: PathBuf) -> Self {
        Self {
            metadata,
            path,
            discovered_at: Utc::now(),
        }
    }

    /// 包名
    pub fn package(&self) -> &str {
        &self.metadata.package
    }

    /// 模块版本
    pub fn version(&self) -> &str {
        &self.metadata.version
    }

    /// 命名空间根
    pub fn namespace(&self) -> &str {
        &self.metadata.namespace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_defaults() {
        let metadata = ModuleMetadata::new("acme/SalesReports", "Sales Reports", "1.0.0");

        assert_eq!(metadata.slug, "sales-reports");
        assert_eq!(metadata.namespace, "sales_reports");
        assert_eq!(metadata.entry, "acme/SalesReports");
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn test_derive_slug() {
        assert_eq!(derive_slug("acme/sales"), "sales");
        assert_eq!(derive_slug("acme/product_catalog"), "product-catalog");
        assert_eq!(derive_slug("Inventory"), "inventory");
        assert_eq!(derive_slug("acme/HRModule"), "hrmodule");
    }

    #[test]
    fn test_metadata_validation() {
        let mut metadata = ModuleMetadata::new("acme/sales", "Sales", "not-a-version");
        metadata.dependencies.push(Dependency::new("acme/sales", "^1"));
        metadata.dependencies.push(Dependency::new("acme/base", "~~1"));

        let errors = metadata.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_owns_type() {
        let metadata =
            ModuleMetadata::new("acme/sales", "Sales", "1.0.0").with_namespace("acme_sales");

        assert!(metadata.owns_type("acme_sales::models::Order"));
        assert!(!metadata.owns_type("acme_sales_extra::models::Order"));
        assert!(!metadata.owns_type("acme_base::models::Product"));
    }

    #[test]
    fn test_dependency_version_check() {
        let dep = Dependency::new("acme/base", "^1.0.0");

        assert!(dep.version_matches(&Version::parse("1.0.0").unwrap()));
        assert!(dep.version_matches(&Version::parse("1.5.0").unwrap()));
        assert!(!dep.version_matches(&Version::parse("2.0.0").unwrap()));
        assert!(!dep.clone().optional().version_matches(&Version::parse("0.9.0").unwrap()));
    }

    #[test]
    fn test_required_dependencies() {
        let metadata = ModuleMetadata::new("acme/sales", "Sales", "1.0.0")
            .with_dependency(Dependency::new("acme/base", "*"))
            .with_dependency(Dependency::new("acme/crm", "*").optional());

        let required: Vec<_> = metadata.required_dependencies().collect();
        assert_eq!(required, vec!["acme/base"]);
    }

    #[test]
    fn test_metadata_serialization() {
        let metadata = ModuleMetadata::new("acme/sales", "Sales", "1.0.0")
            .with_dependency(Dependency::new("acme/base", "^1.0"));

        let yaml = serde_yaml::to_string(&metadata).unwrap();
        let parsed: ModuleMetadata = serde_yaml::from_str(&yaml).unwrap();

        assert_eq!(parsed.package, metadata.package);
        assert_eq!(parsed.dependencies.len(), 1);
    }
}
