//! 模块隔离检查
//!
//! 片段只能引用本模块的类型、共享命名空间中的类型或抽象类型。
//! 引用其他已安装模块的具体类型会破坏模块自治，应改为在本模块声明扩展其生成别名的片段。

use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

use crate::compiler::paths::GeneratedPaths;
use crate::module::{ModuleMetadata, ModuleRegistry};
use crate::pipeline::{DomainType, ExtensionRegistry, LogicalName};
use crate::utils::error::{KernelError, Result};

#[derive(Debug, Clone)]
struct KnownFragment {
    logical_name: LogicalName,
    domain: DomainType,
    is_abstract: bool,
}

/// 隔离检查器
///
/// 构造时对扩展注册表做一次快照，检查过程不再持有注册表锁。
pub struct IsolationChecker<'a> {
    modules: &'a ModuleRegistry,
    paths: &'a GeneratedPaths,
    shared_namespaces: Vec<String>,
    tenant: Option<&'a str>,
    fragments: HashMap<String, KnownFragment>,
}

impl<'a> IsolationChecker<'a> {
    /// 创建检查器
    ///
    /// # Arguments
    ///
    /// * `modules` - 模块注册表，用于判定类型归属与安装状态
    /// * `extensions` - 扩展注册表快照来源
    /// * `paths` - 生成路径约定，用于给出建议的生成别名
    /// * `shared_namespaces` - 允许任意模块引用的命名空间
    /// * `tenant` - 租户
    pub fn new(
        modules: &'a ModuleRegistry,
        extensions: &ExtensionRegistry,
        paths: &'a GeneratedPaths,
        shared_namespaces: Vec<String>,
        tenant: Option<&'a str>,
    ) -> IsolationChecker<'a> {
        let fragments = extensions
            .fragments()
            .map(|(name, fragment)| {
                (
                    fragment.type_path().to_string(),
                    KnownFragment {
                        logical_name: name.clone(),
                        domain: fragment.domain(),
                        is_abstract: fragment.is_abstract(),
                    },
                )
            })
            .collect();

        Self {
            modules,
            paths,
            shared_namespaces,
            tenant,
            fragments,
        }
    }

    fn is_shared(&self, type_path: &str) -> bool {
        self.shared_namespaces.iter().any(|ns| {
            type_path == ns
                || type_path
                    .strip_prefix(ns.as_str())
                    .map(|rest| rest.starts_with("::"))
                    .unwrap_or(false)
        })
    }

    fn is_abstract_fragment(&self, type_path: &str) -> bool {
        self.fragments
            .get(type_path)
            .map(|f| f.is_abstract)
            .unwrap_or(false)
    }

    /// 外部类型对应的生成别名
    fn suggestion(&self, type_path: &str) -> String {
        match self.fragments.get(type_path) {
            Some(known) => self.paths.generated_type_path(known.domain, &known.logical_name),
            None => {
                let short = type_path.rsplit("::").next().unwrap_or(type_path);
                self.paths
                    .generated_type_path(DomainType::Models, &LogicalName::new(short))
            }
        }
    }

    /// 检查某个模块的片段引用
    ///
    /// # Errors
    ///
    /// - 引用其他已安装模块的具体类型时返回 [`KernelError::ForeignReference`]
    /// - 引用未安装模块的类型时返回 [`KernelError::UnavailableModuleReference`]
    pub async fn check(&self, module: &ModuleMetadata, references: &BTreeSet<String>) -> Result<()> {
        for type_path in references {
            if module.owns_type(type_path)
                || self.is_shared(type_path)
                || self.is_abstract_fragment(type_path)
            {
                continue;
            }

            match self.modules.find_for_type(type_path).await {
                Some(owner) if owner.package() == module.package => continue,
                Some(owner) if declares_abstract(&owner.metadata, type_path) => continue,
                Some(owner) => {
                    if self.modules.is_installed(owner.package(), self.tenant).await? {
                        warn!(
                            package = %module.package,
                            type_name = %type_path,
                            foreign = %owner.package(),
                            "跨模块引用"
                        );
                        return Err(KernelError::ForeignReference {
                            module: module.package.clone(),
                            type_name: type_path.clone(),
                            foreign_module: owner.package().to_string(),
                            suggestion: self.suggestion(type_path),
                        });
                    }
                    return Err(KernelError::UnavailableModuleReference {
                        module: module.package.clone(),
                        type_name: type_path.clone(),
                        missing_module: owner.package().to_string(),
                    });
                }
                None => {
                    let available = self.modules.find_for_type_in_available(type_path).await?;
                    if let Some(owner) = available.filter(|o| !declares_abstract(&o.metadata, type_path)) {
                        return Err(KernelError::UnavailableModuleReference {
                            module: module.package.clone(),
                            type_name: type_path.clone(),
                            missing_module: owner.package().to_string(),
                        });
                    }
                    debug!(type_name = %type_path, "外部类型，不属于任何模块");
                }
            }
        }
        Ok(())
    }
}

fn declares_abstract(owner: &ModuleMetadata, type_path: &str) -> bool {
    owner.abstract_types.iter().any(|t| t == type_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{InMemoryModuleStateStore, ModuleStateStore};
    use crate::pipeline::Fragment;
    use std::path::PathBuf;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn registry_with(installed: &[&str]) -> ModuleRegistry {
        let store = Arc::new(InMemoryModuleStateStore::new());
        for package in installed {
            store.install(package, "1.0.0", None).await.unwrap();
        }
        let registry = ModuleRegistry::new(vec![], vec![], store);
        for (package, ns) in [
            ("acme/sales", "acme_sales"),
            ("acme/stock", "acme_stock"),
            ("acme/hr", "acme_hr"),
        ] {
            let mut metadata = ModuleMetadata::new(package, package, "1.0.0").with_namespace(ns);
            if package == "acme/stock" {
                metadata.abstract_types.push("acme_stock::models::Movable".to_string());
            }
            registry
                .register_with_metadata(metadata, PathBuf::from(ns))
                .await
                .unwrap();
        }
        registry
    }

    fn refs(items: &[&str]) -> BTreeSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_foreign_reference_rejected() {
        let modules = registry_with(&["acme/sales", "acme/stock"]).await;
        let mut extensions = ExtensionRegistry::new();
        extensions.register(
            Arc::new(Fragment::builder("acme_stock::models::Warehouse").package("acme/stock").build()),
            "warehouse",
        );
        let paths = GeneratedPaths::new("/cache", "mosaic");
        let checker = IsolationChecker::new(
            &modules,
            &extensions,
            &paths,
            vec!["mosaic::models".to_string()],
            None,
        );
        let sales = modules.get("acme/sales").await.unwrap().metadata;

        let err = checker
            .check(&sales, &refs(&["acme_stock::models::Warehouse"]))
            .await
            .unwrap_err();
        match err {
            KernelError::ForeignReference {
                foreign_module,
                suggestion,
                ..
            } => {
                assert_eq!(foreign_module, "acme/stock");
                assert_eq!(suggestion, "mosaic::models::Warehouse");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_allowed_references() {
        let modules = registry_with(&["acme/sales", "acme/stock"]).await;
        let extensions = ExtensionRegistry::new();
        let paths = GeneratedPaths::new("/cache", "mosaic");
        let checker = IsolationChecker::new(
            &modules,
            &extensions,
            &paths,
            vec!["mosaic::models".to_string(), "mosaic_core".to_string()],
            None,
        );
        let sales = modules.get("acme/sales").await.unwrap().metadata;

        checker
            .check(
                &sales,
                &refs(&[
                    "mosaic::models::Warehouse",
                    "mosaic_core::pipeline::Entity",
                    "acme_sales::models::Order",
                    "acme_stock::models::Movable",
                    "std::collections::HashMap",
                ]),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_unavailable_module_reference() {
        let modules = registry_with(&["acme/sales"]).await;
        let extensions = ExtensionRegistry::new();
        let paths = GeneratedPaths::new("/cache", "mosaic");
        let checker = IsolationChecker::new(&modules, &extensions, &paths, vec![], None);
        let sales = modules.get("acme/sales").await.unwrap().metadata;

        let err = checker
            .check(&sales, &refs(&["acme_hr::models::Employee"]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KernelError::UnavailableModuleReference { ref missing_module, .. } if missing_module == "acme/hr"
        ));
    }

    #[tokio::test]
    async fn test_reference_into_available_dir() {
        let dir = TempDir::new().unwrap();
        let module_dir = dir.path().join("billing");
        tokio::fs::create_dir_all(&module_dir).await.unwrap();
        tokio::fs::write(
            module_dir.join("module.yaml"),
            "package: acme/billing\nname: Billing\nversion: 1.0.0\nnamespace: acme_billing\n",
        )
        .await
        .unwrap();

        let store = Arc::new(InMemoryModuleStateStore::new());
        let modules = ModuleRegistry::new(vec![], vec![dir.path().to_path_buf()], store);
        modules
            .register_with_metadata(
                ModuleMetadata::new("acme/sales", "Sales", "1.0.0").with_namespace("acme_sales"),
                PathBuf::from("sales"),
            )
            .await
            .unwrap();
        let extensions = ExtensionRegistry::new();
        let paths = GeneratedPaths::new("/cache", "mosaic");
        let checker = IsolationChecker::new(&modules, &extensions, &paths, vec![], None);
        let sales = modules.get("acme/sales").await.unwrap().metadata;

        let err = checker
            .check(&sales, &refs(&["acme_billing::models::Invoice"]))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), crate::utils::error::error_code::COMPILER_UNAVAILABLE_MODULE);
    }
}
