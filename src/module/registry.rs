//! 模块注册表
//!
//! 管理所有已发现的模块，提供扫描、注册、查询，以及两个缓存：
//! 解析顺序缓存和按租户的已安装模块缓存。缓存在扫描或状态变更后失效。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};

use crate::core::config::ModuleConfig;
use crate::module::dependency::{DependencyGraph, Resolver};
use crate::module::metadata::{ModuleInfo, ModuleMetadata};
use crate::module::parser::{ModuleParser, MANIFEST_FILE};
use crate::module::state::{ModuleState, ModuleStateStore};
use crate::utils::error::{KernelError, Result};

type TenantKey = Option<String>;

/// 模块注册表
pub struct ModuleRegistry {
    /// 已发现的模块：包名 -> 模块信息
    modules: Arc<RwLock<HashMap<String, ModuleInfo>>>,

    /// 已安装模块目录
    module_dirs: Vec<PathBuf>,

    /// 可用但未安装的模块目录
    available_dirs: Vec<PathBuf>,

    /// 模块状态存储
    store: Arc<dyn ModuleStateStore>,

    /// 全图解析顺序缓存
    resolved: RwLock<Option<Vec<String>>>,

    /// 按租户的已安装模块缓存
    installed: RwLock<HashMap<TenantKey, HashMap<String, ModuleState>>>,
}

impl std::fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("module_dirs", &self.module_dirs)
            .field("available_dirs", &self.available_dirs)
            .finish_non_exhaustive()
    }
}

impl ModuleRegistry {
    /// 创建新的模块注册表
    ///
    /// # Arguments
    ///
    /// * `module_dirs` - 已安装模块目录
    /// * `available_dirs` - 可用模块目录
    /// * `store` - 模块状态存储
    pub fn new(
        module_dirs: Vec<PathBuf>,
        available_dirs: Vec<PathBuf>,
        store: Arc<dyn ModuleStateStore>,
    ) -> Self {
        Self {
            modules: Arc::new(RwLock::new(HashMap::new())),
            module_dirs,
            available_dirs,
            store,
            resolved: RwLock::new(None),
            installed: RwLock::new(HashMap::new()),
        }
    }

    /// 按模块配置创建
    pub fn from_config(config: &ModuleConfig, store: Arc<dyn ModuleStateStore>) -> Self {
        Self::new(
            config.module_dirs.clone(),
            config.available_dirs.clone(),
            store,
        )
    }

    /// 模块状态存储
    pub fn store(&self) -> &Arc<dyn ModuleStateStore> {
        &self.store
    }

    // ========================================================================
    // 扫描与注册
    // ========================================================================

    /// 扫描已安装模块目录，注册新发现的模块
    ///
    /// 支持 `<dir>/<name>/module.yaml` 和 `<dir>/<vendor>/<name>/module.yaml`
    /// 两种布局。已注册的包会被跳过，解析失败的模块只记录警告。
    ///
    /// # Returns
    ///
    /// 本次新注册的包名
    pub async fn scan(&self) -> Result<Vec<String>> {
        let mut registered = Vec::new();
        for path in discover_manifests(&self.module_dirs).await {
            let metadata = match ModuleParser::parse_file(&path.join(MANIFEST_FILE)).await {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "解析模块描述失败");
                    continue;
                }
            };
            match self.register_with_metadata(metadata, path.clone()).await {
                Ok(package) => {
                    info!(package = %package, path = %path.display(), "发现模块");
                    registered.push(package);
                }
                Err(KernelError::ModuleAlreadyRegistered(package)) => {
                    trace!(package = %package, "模块已注册，跳过");
                }
                Err(e) => warn!(path = %path.display(), error = %e, "注册模块失败"),
            }
        }
        self.invalidate().await;
        Ok(registered)
    }

    /// 清空后重新扫描
    pub async fn rescan(&self) -> Result<Vec<String>> {
        self.modules.write().await.clear();
        self.scan().await
    }

    /// 注册单个模块目录（包含 module.yaml）
    pub async fn register(&self, module_path: &Path) -> Result<String> {
        let metadata = ModuleParser::parse_file(&module_path.join(MANIFEST_FILE)).await?;
        self.register_with_metadata(metadata, module_path.to_path_buf())
            .await
    }

    /// 使用元数据直接注册模块
    ///
    /// 用于没有物理描述文件的模块（内置模块或测试）。
    pub async fn register_with_metadata(
        &self,
        mut metadata: ModuleMetadata,
        path: PathBuf,
    ) -> Result<String> {
        metadata.fill_defaults();
        ModuleParser::validate(&metadata)?;
        let package = metadata.package.clone();

        {
            let mut modules = self.modules.write().await;
            if modules.contains_key(&package) {
                return Err(KernelError::ModuleAlreadyRegistered(package));
            }
            modules.insert(package.clone(), ModuleInfo::new(metadata, path));
        }

        *self.resolved.write().await = None;
        debug!(package = %package, "模块已注册");
        Ok(package)
    }

    /// 取消注册模块
    pub async fn unregister(&self, package: &str) -> Result<ModuleInfo> {
        let info = self
            .modules
            .write()
            .await
            .remove(package)
            .ok_or_else(|| KernelError::ModuleNotFound(package.to_string()))?;
        *self.resolved.write().await = None;
        debug!(package = %package, "模块已取消注册");
        Ok(info)
    }

    // ========================================================================
    // 查询
    // ========================================================================

    /// 获取模块信息
    pub async fn get(&self, package: &str) -> Option<ModuleInfo> {
        self.modules.read().await.get(package).cloned()
    }

    /// 获取模块信息，不存在时返回 `ModuleNotFound`
    pub async fn get_or_fail(&self, package: &str) -> Result<ModuleInfo> {
        self.get(package)
            .await
            .ok_or_else(|| KernelError::ModuleNotFound(package.to_string()))
    }

    /// 全部模块，按包名排序
    pub async fn list(&self) -> Vec<ModuleInfo> {
        let mut modules: Vec<ModuleInfo> = self.modules.read().await.values().cloned().collect();
        modules.sort_by(|a, b| a.package().cmp(b.package()));
        modules
    }

    /// 模块是否存在
    pub async fn exists(&self, package: &str) -> bool {
        self.modules.read().await.contains_key(package)
    }

    /// 已注册模块数量
    pub async fn count(&self) -> usize {
        self.modules.read().await.len()
    }

    /// 包名 -> 元数据 的快照
    pub async fn metadata_map(&self) -> HashMap<String, ModuleMetadata> {
        self.modules
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.metadata.clone()))
            .collect()
    }

    /// 由当前模块构建依赖图
    pub async fn graph(&self) -> DependencyGraph {
        let modules = self.modules.read().await;
        DependencyGraph::from_modules(modules.values().map(|m| &m.metadata))
    }

    // ========================================================================
    // 解析顺序
    // ========================================================================

    /// 全部模块的依赖顺序（带缓存）
    ///
    /// 结果包含被依赖但尚未注册的包名，调用方按需过滤。
    pub async fn resolved(&self) -> Result<Vec<String>> {
        if let Some(order) = self.resolved.read().await.as_ref() {
            return Ok(order.clone());
        }
        let graph = self.graph().await;
        let order = Resolver::new(&graph).resolve()?;
        *self.resolved.write().await = Some(order.clone());
        Ok(order)
    }

    /// 单个模块及其传递依赖的顺序，模块本身位于最后
    pub async fn resolved_for(&self, package: &str) -> Result<Vec<String>> {
        let graph = self.graph().await;
        Resolver::new(&graph).resolve_for(package)
    }

    /// 使解析缓存和已安装缓存失效
    pub async fn invalidate(&self) {
        *self.resolved.write().await = None;
        self.installed.write().await.clear();
    }

    // ========================================================================
    // 已安装缓存
    // ========================================================================

    /// 租户下已安装的模块（读穿缓存）
    pub async fn installed(&self, tenant: Option<&str>) -> Result<HashMap<String, ModuleState>> {
        let key: TenantKey = tenant.map(str::to_string);
        if let Some(states) = self.installed.read().await.get(&key) {
            return Ok(states.clone());
        }
        let states = self.store.all(tenant).await?;
        self.installed.write().await.insert(key, states.clone());
        Ok(states)
    }

    /// 使某个租户的已安装缓存失效
    pub async fn invalidate_installed(&self, tenant: Option<&str>) {
        self.installed
            .write()
            .await
            .remove(&tenant.map(str::to_string));
    }

    /// 模块是否已安装
    pub async fn is_installed(&self, package: &str, tenant: Option<&str>) -> Result<bool> {
        Ok(self.installed(tenant).await?.contains_key(package))
    }

    /// 模块是否已安装且已启用
    pub async fn is_enabled(&self, package: &str, tenant: Option<&str>) -> Result<bool> {
        Ok(self
            .installed(tenant)
            .await?
            .get(package)
            .map(|s| s.enabled)
            .unwrap_or(false))
    }

    // ========================================================================
    // 类型归属
    // ========================================================================

    /// 查找声明某个类型路径的模块（最长命名空间前缀匹配）
    pub async fn find_for_type(&self, type_path: &str) -> Option<ModuleInfo> {
        let modules = self.modules.read().await;
        longest_namespace_match(modules.values(), type_path).cloned()
    }

    /// 扫描可用模块目录，返回尚未注册的模块
    pub async fn scan_available(&self) -> Result<Vec<ModuleInfo>> {
        let mut available = Vec::new();
        for path in discover_manifests(&self.available_dirs).await {
            match ModuleParser::parse_file(&path.join(MANIFEST_FILE)).await {
                Ok(metadata) => {
                    if !self.exists(&metadata.package).await {
                        available.push(ModuleInfo::new(metadata, path));
                    }
                }
                Err(e) => warn!(path = %path.display(), error = %e, "解析可用模块描述失败"),
            }
        }
        available.sort_by(|a, b| a.package().cmp(b.package()));
        Ok(available)
    }

    /// 在可用但未安装的模块中查找声明某个类型路径的模块
    pub async fn find_for_type_in_available(&self, type_path: &str) -> Result<Option<ModuleInfo>> {
        let available = self.scan_available().await?;
        Ok(longest_namespace_match(available.iter(), type_path).cloned())
    }
}

fn longest_namespace_match<'a>(
    modules: impl Iterator<Item = &'a ModuleInfo>,
    type_path: &str,
) -> Option<&'a ModuleInfo> {
    modules
        .filter(|m| m.metadata.owns_type(type_path))
        .max_by_key(|m| m.namespace().len())
}

/// 在目录列表中查找包含 module.yaml 的模块目录（一层或两层深）
async fn discover_manifests(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for dir in dirs {
        let mut pending = vec![(dir.clone(), 0usize)];
        while let Some((current, depth)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&current).await {
                Ok(entries) => entries,
                Err(e) => {
                    if depth == 0 {
                        debug!(dir = %current.display(), error = %e, "模块目录不可读，跳过");
                    }
                    continue;
                }
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                let is_dir = entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false);
                if !is_dir {
                    continue;
                }
                if tokio::fs::try_exists(path.join(MANIFEST_FILE))
                    .await
                    .unwrap_or(false)
                {
                    found.push(path);
                } else if depth == 0 {
                    pending.push((path, depth + 1));
                }
            }
        }
    }
    found.sort();
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::metadata::Dependency;
    use crate::module::state::InMemoryModuleStateStore;
    use tempfile::TempDir;

    fn registry_with(dirs: Vec<PathBuf>, available: Vec<PathBuf>) -> ModuleRegistry {
        ModuleRegistry::new(dirs, available, Arc::new(InMemoryModuleStateStore::new()))
    }

    async fn write_manifest(dir: &Path, package: &str, namespace: &str, deps: &[&str]) {
        tokio::fs::create_dir_all(dir).await.unwrap();
        let mut yaml = format!(
            "package: {}\nname: {}\nversion: 1.0.0\nnamespace: {}\n",
            package, package, namespace
        );
        if !deps.is_empty() {
            yaml.push_str("dependencies:\n");
            for dep in deps {
                yaml.push_str(&format!("  - package: {}\n", dep));
            }
        }
        tokio::fs::write(dir.join(MANIFEST_FILE), yaml).await.unwrap();
    }

    #[tokio::test]
    async fn test_scan_nested_layouts() {
        let temp = TempDir::new().unwrap();
        write_manifest(&temp.path().join("base"), "acme/base", "acme_base", &[]).await;
        write_manifest(
            &temp.path().join("acme/sales"),
            "acme/sales",
            "acme_sales",
            &["acme/base"],
        )
        .await;
        tokio::fs::create_dir_all(temp.path().join("empty")).await.unwrap();

        let registry = registry_with(vec![temp.path().to_path_buf()], vec![]);
        let mut found = registry.scan().await.unwrap();
        found.sort();

        assert_eq!(found, vec!["acme/base", "acme/sales"]);
        assert_eq!(registry.count().await, 2);

        // 重复扫描不重复注册
        assert!(registry.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_scan_skips_invalid_manifest() {
        let temp = TempDir::new().unwrap();
        let broken = temp.path().join("broken");
        tokio::fs::create_dir_all(&broken).await.unwrap();
        tokio::fs::write(broken.join(MANIFEST_FILE), "name: [").await.unwrap();

        let registry = registry_with(vec![temp.path().to_path_buf()], vec![]);
        assert!(registry.scan().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_register_duplicate() {
        let registry = registry_with(vec![], vec![]);
        let metadata = ModuleMetadata::new("acme/base", "Base", "1.0.0");

        registry
            .register_with_metadata(metadata.clone(), PathBuf::from("/m/base"))
            .await
            .unwrap();
        let err = registry
            .register_with_metadata(metadata, PathBuf::from("/m/base"))
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::ModuleAlreadyRegistered(_)));

        registry.unregister("acme/base").await.unwrap();
        assert!(matches!(
            registry.unregister("acme/base").await,
            Err(KernelError::ModuleNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_resolved_cache_invalidated_on_register() {
        let registry = registry_with(vec![], vec![]);
        registry
            .register_with_metadata(
                ModuleMetadata::new("acme/sales", "Sales", "1.0.0")
                    .with_dependency(Dependency::new("acme/base", "*")),
                PathBuf::from("/m/sales"),
            )
            .await
            .unwrap();

        assert_eq!(registry.resolved().await.unwrap(), vec!["acme/base", "acme/sales"]);

        registry
            .register_with_metadata(
                ModuleMetadata::new("acme/crm", "Crm", "1.0.0"),
                PathBuf::from("/m/crm"),
            )
            .await
            .unwrap();
        assert_eq!(
            registry.resolved().await.unwrap(),
            vec!["acme/base", "acme/crm", "acme/sales"]
        );
        assert_eq!(
            registry.resolved_for("acme/sales").await.unwrap(),
            vec!["acme/base", "acme/sales"]
        );
    }

    #[tokio::test]
    async fn test_installed_cache() {
        let registry = registry_with(vec![], vec![]);
        assert!(!registry.is_installed("acme/base", None).await.unwrap());

        registry.store().install("acme/base", "1.0.0", None).await.unwrap();
        // 缓存仍为旧值
        assert!(!registry.is_installed("acme/base", None).await.unwrap());

        registry.invalidate_installed(None).await;
        assert!(registry.is_installed("acme/base", None).await.unwrap());
        assert!(registry.is_enabled("acme/base", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_for_type() {
        let registry = registry_with(vec![], vec![]);
        registry
            .register_with_metadata(
                ModuleMetadata::new("acme/sales", "Sales", "1.0.0").with_namespace("acme"),
                PathBuf::from("/m/a"),
            )
            .await
            .unwrap();
        registry
            .register_with_metadata(
                ModuleMetadata::new("acme/sales-pro", "Sales Pro", "1.0.0")
                    .with_namespace("acme::pro"),
                PathBuf::from("/m/b"),
            )
            .await
            .unwrap();

        let owner = registry.find_for_type("acme::pro::models::Quote").await.unwrap();
        assert_eq!(owner.package(), "acme/sales-pro");
        let owner = registry.find_for_type("acme::models::Order").await.unwrap();
        assert_eq!(owner.package(), "acme/sales");
        assert!(registry.find_for_type("other::Thing").await.is_none());
    }

    #[tokio::test]
    async fn test_find_for_type_in_available() {
        let installed = TempDir::new().unwrap();
        let available = TempDir::new().unwrap();
        write_manifest(&installed.path().join("base"), "acme/base", "acme_base", &[]).await;
        write_manifest(&available.path().join("base"), "acme/base", "acme_base", &[]).await;
        write_manifest(&available.path().join("hr"), "acme/hr", "acme_hr", &[]).await;

        let registry = registry_with(
            vec![installed.path().to_path_buf()],
            vec![available.path().to_path_buf()],
        );
        registry.scan().await.unwrap();

        let list = registry.scan_available().await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].package(), "acme/hr");

        let found = registry
            .find_for_type_in_available("acme_hr::models::Employee")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.package(), "acme/hr");
        assert!(registry
            .find_for_type_in_available("acme_base::models::Thing")
            .await
            .unwrap()
            .is_none());
    }
}
