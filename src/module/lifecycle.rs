//! 模块生命周期管理
//!
//! 安装、启用、停用、升级与卸载。所有状态变更都在依赖解析和版本检查通过之后才发生，
//! 解析失败不会留下部分写入的状态。

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::dependency::{check_version_requirements, ReverseGraph, UninstallResolver};
use super::registry::ModuleRegistry;
use super::state::ModuleState;
use crate::pipeline::ExtensionRegistry;
use crate::utils::error::{KernelError, Result};

/// 模块生命周期管理器
pub struct ModuleLifecycleManager {
    modules: Arc<ModuleRegistry>,
    extensions: Arc<RwLock<ExtensionRegistry>>,
}

impl ModuleLifecycleManager {
    /// 创建生命周期管理器
    pub fn new(modules: Arc<ModuleRegistry>, extensions: Arc<RwLock<ExtensionRegistry>>) -> Self {
        Self { modules, extensions }
    }

    fn not_installed(package: &str, tenant: Option<&str>) -> KernelError {
        KernelError::ModuleNotInstalled {
            module: package.to_string(),
            tenant: tenant.map(str::to_string),
        }
    }

    async fn require_installed(&self, package: &str, tenant: Option<&str>) -> Result<ModuleState> {
        self.modules
            .store()
            .get(package, tenant)
            .await?
            .ok_or_else(|| Self::not_installed(package, tenant))
    }

    /// 安装模块及其尚未安装的传递依赖
    ///
    /// # Returns
    ///
    /// 本次新安装的包名，按依赖顺序
    ///
    /// # Errors
    ///
    /// - 存在循环依赖时返回 `CircularDependency`
    /// - 依赖缺失或版本不满足时返回 `DependencyNotFound` / `VersionMismatch`
    #[instrument(skip(self))]
    pub async fn install(&self, package: &str, tenant: Option<&str>) -> Result<Vec<String>> {
        if !self.modules.exists(package).await {
            return Err(KernelError::ModuleNotFound(package.to_string()));
        }

        let order = self.modules.resolved_for(package).await?;
        let metadata = self.modules.metadata_map().await;
        check_version_requirements(&order, &metadata)?;

        let installed = self.modules.installed(tenant).await?;
        let store = self.modules.store();
        let mut newly = Vec::new();

        for pkg in &order {
            if installed.contains_key(pkg) {
                debug!(package = %pkg, "已安装，跳过");
                continue;
            }
            let written = match metadata.get(pkg) {
                Some(meta) => store.install(pkg, &meta.version, tenant).await,
                None => Err(KernelError::DependencyNotFound(pkg.clone())),
            };
            if let Err(e) = written {
                self.revert_install(&newly, tenant).await;
                return Err(e);
            }
            info!(package = %pkg, tenant = ?tenant, "模块已安装");
            newly.push(pkg.clone());
        }

        self.modules.invalidate_installed(tenant).await;
        Ok(newly)
    }

    /// 撤销一次未完成安装中已写入的记录
    async fn revert_install(&self, written: &[String], tenant: Option<&str>) {
        let store = self.modules.store();
        for pkg in written.iter().rev() {
            if let Err(e) = store.uninstall(pkg, tenant).await {
                warn!(package = %pkg, error = %e, "撤销安装记录失败");
            }
        }
        self.modules.invalidate_installed(tenant).await;
    }

    /// 启用模块
    ///
    /// # Errors
    ///
    /// - 模块未安装时返回 `ModuleNotInstalled`
    /// - 任一必需依赖未安装或未启用时返回 `InactiveDependencies`
    #[instrument(skip(self))]
    pub async fn enable(&self, package: &str, tenant: Option<&str>) -> Result<ModuleState> {
        self.require_installed(package, tenant).await?;
        let info = self.modules.get_or_fail(package).await?;

        let mut inactive = Vec::new();
        for dependency in info.metadata.required_dependencies() {
            if !self.modules.is_enabled(dependency, tenant).await? {
                inactive.push(dependency.to_string());
            }
        }
        if !inactive.is_empty() {
            return Err(KernelError::InactiveDependencies {
                module: package.to_string(),
                inactive,
            });
        }

        let state = self.modules.store().enable(package, tenant).await?;
        self.modules.invalidate_installed(tenant).await;
        info!(package = %package, "模块已启用");
        Ok(state)
    }

    /// 停用模块
    #[instrument(skip(self))]
    pub async fn disable(&self, package: &str, tenant: Option<&str>) -> Result<ModuleState> {
        self.require_installed(package, tenant).await?;
        let state = self.modules.store().disable(package, tenant).await?;
        self.modules.invalidate_installed(tenant).await;
        info!(package = %package, "模块已停用");
        Ok(state)
    }

    /// 升级模块，记录当前注册的版本
    #[instrument(skip(self))]
    pub async fn upgrade(&self, package: &str, tenant: Option<&str>) -> Result<ModuleState> {
        let previous = self.require_installed(package, tenant).await?;
        let info = self.modules.get_or_fail(package).await?;

        let order = self.modules.resolved_for(package).await?;
        check_version_requirements(&order, &self.modules.metadata_map().await)?;

        let state = self
            .modules
            .store()
            .upgrade(package, info.version(), tenant)
            .await?;
        self.modules.invalidate_installed(tenant).await;
        info!(
            package = %package,
            from = %previous.version,
            to = %state.version,
            "模块已升级"
        );
        Ok(state)
    }

    /// 计算卸载计划，非演练时依次执行
    ///
    /// 每个计划中的包依次：从扩展注册表卸下片段，停用，删除状态。
    ///
    /// # Arguments
    ///
    /// * `package` - 目标模块
    /// * `tenant` - 租户
    /// * `cascade` - 是否级联卸载全部依赖者
    /// * `dry_run` - 只返回计划，不做任何变更
    ///
    /// # Returns
    ///
    /// 卸载计划，依赖者在被依赖者之前
    ///
    /// # Errors
    ///
    /// - 模块未安装时返回 `ModuleNotInstalled`
    /// - 非级联且存在已安装的依赖者时返回 `BlockedByDependents`
    #[instrument(skip(self))]
    pub async fn uninstall(
        &self,
        package: &str,
        tenant: Option<&str>,
        cascade: bool,
        dry_run: bool,
    ) -> Result<Vec<String>> {
        let installed = self.modules.installed(tenant).await?;
        if !installed.contains_key(package) {
            return Err(Self::not_installed(package, tenant));
        }

        let graph = self.modules.graph().await;
        let reverse = ReverseGraph::from_graph(&graph, |pkg| installed.contains_key(pkg));
        let plan = UninstallResolver::new(reverse).resolve(package, cascade)?;

        if dry_run {
            info!(package = %package, plan = ?plan, "卸载演练");
            return Ok(plan);
        }

        let store = self.modules.store();
        for pkg in &plan {
            let removed = self.extensions.write().unregister_module(pkg);
            debug!(package = %pkg, removed, "片段已卸下");
            store.disable(pkg, tenant).await?;
            store.uninstall(pkg, tenant).await?;
            info!(package = %pkg, tenant = ?tenant, "模块已卸载");
        }

        self.modules.invalidate_installed(tenant).await;
        Ok(plan)
    }

    /// 删除磁盘上已不存在的模块的状态记录
    ///
    /// # Returns
    ///
    /// 被清理的包名（字典序）
    pub async fn remove_orphans(&self, tenant: Option<&str>) -> Result<Vec<String>> {
        let store = self.modules.store();
        let known: HashSet<String> = self
            .modules
            .list()
            .await
            .into_iter()
            .map(|m| m.metadata.package)
            .collect();

        let mut orphans: Vec<String> = store
            .all(tenant)
            .await?
            .into_keys()
            .filter(|pkg| !known.contains(pkg))
            .collect();
        orphans.sort();

        for pkg in &orphans {
            store.uninstall(pkg, tenant).await?;
            warn!(package = %pkg, "模块目录已不存在，清理状态记录");
        }
        if !orphans.is_empty() {
            self.modules.invalidate_installed(tenant).await;
        }
        Ok(orphans)
    }
}
