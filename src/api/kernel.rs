//! 内核入口
//!
//! [`Kernel`] 持有配置、模块注册表、扩展注册表、状态存储、生命周期管理器和预编译器，
//! 并负责按依赖顺序引导已启用模块。
//!
//! # 示例
//!
//! ```rust,no_run
//! use mosaic_core::api::{Kernel, ModuleEntry, RegistrationContext};
//! use mosaic_core::pipeline::Fragment;
//! use mosaic_core::{KernelConfig, Result};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct Sales;
//!
//! #[async_trait::async_trait]
//! impl ModuleEntry for Sales {
//!     fn register(&self, ctx: &mut RegistrationContext) -> Result<()> {
//!         ctx.extend(
//!             "product",
//!             Fragment::builder("acme_sales::models::Product")
//!                 .method("price", |next, entity, args| {
//!                     let base = next.call(entity, args)?;
//!                     Ok(json!(base.as_f64().unwrap_or(0.0) * 0.9))
//!                 })
//!                 .build(),
//!         );
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let config = KernelConfig::builder().module_dir("modules").build();
//!     let mut kernel = Kernel::new(config).await?;
//!     kernel.register_entry("acme/sales", Arc::new(Sales));
//!
//!     kernel.install("acme/sales", None).await?;
//!     kernel.boot(None).await?;
//!     kernel.compile_all(true).await?;
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::compiler::{CompileOutcome, CompileReport, CompiledPipeline, PipelineCompiler};
use crate::core::config::KernelConfig;
use crate::module::{
    JsonModuleStateStore, ModuleLifecycleManager, ModuleRegistry, ModuleState, ModuleStateStore,
};
use crate::pipeline::{ExtensionRegistry, Fragment, LogicalName, PipelineRuntime};
use crate::utils::error::{KernelError, Result};

// ============================================================================
// 模块入口
// ============================================================================

/// 宿主为模块提供的入口实现
///
/// 通过模块清单中的 `entry` 句柄与 [`Kernel::register_entry`] 注册的实现关联。
#[async_trait]
pub trait ModuleEntry: Send + Sync {
    /// 注册本模块的片段
    fn register(&self, ctx: &mut RegistrationContext) -> Result<()>;

    /// 全部模块注册完成后调用
    async fn boot(&self) -> Result<()> {
        Ok(())
    }

    /// 内核关闭时调用，顺序与引导相反
    async fn destroy(&self) -> Result<()> {
        Ok(())
    }
}

/// 注册上下文
///
/// 收集一个模块声明的片段，由内核统一写入扩展注册表。
pub struct RegistrationContext {
    package: String,
    fragments: Vec<(LogicalName, Fragment)>,
}

impl RegistrationContext {
    fn new(package: &str) -> Self {
        Self {
            package: package.to_string(),
            fragments: Vec::new(),
        }
    }

    /// 正在注册的模块
    pub fn package(&self) -> &str {
        &self.package
    }

    /// 为逻辑名追加一个片段，片段被标记为本模块声明
    pub fn extend(&mut self, logical_name: impl Into<LogicalName>, mut fragment: Fragment) -> &mut Self {
        fragment.stamp_package(&self.package);
        self.fragments.push((logical_name.into(), fragment));
        self
    }

    /// 已收集的片段数量
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    /// 是否没有收集任何片段
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    fn apply(self, registry: &mut ExtensionRegistry) -> usize {
        let mut count = 0;
        for (logical_name, fragment) in self.fragments {
            let fragment = Arc::new(fragment);
            if registry.register(Arc::clone(&fragment), logical_name.clone()) {
                count += 1;
            }
            registry.register_static(fragment, logical_name);
        }
        count
    }
}

// ============================================================================
// 内核状态
// ============================================================================

/// 内核状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    /// 已创建，尚未引导
    Created,
    /// 已引导
    Booted,
    /// 已关闭
    ShutDown,
}

impl KernelState {
    /// 检查是否可以引导
    pub fn can_boot(&self) -> bool {
        matches!(self, KernelState::Created)
    }

    /// 检查是否已引导
    pub fn is_booted(&self) -> bool {
        matches!(self, KernelState::Booted)
    }
}

// ============================================================================
// Kernel
// ============================================================================

/// 模块内核
pub struct Kernel {
    config: KernelConfig,
    state: tokio::sync::RwLock<KernelState>,
    modules: Arc<ModuleRegistry>,
    extensions: Arc<RwLock<ExtensionRegistry>>,
    lifecycle: ModuleLifecycleManager,
    compiler: PipelineCompiler,
    runtime: PipelineRuntime,
    entries: HashMap<String, Arc<dyn ModuleEntry>>,
    booted: tokio::sync::Mutex<Vec<String>>,
}

impl Kernel {
    /// 使用配置中的状态文件创建内核
    pub async fn new(config: KernelConfig) -> Result<Self> {
        let store = JsonModuleStateStore::open(config.modules.state_file.clone()).await?;
        Self::with_state_store(config, Arc::new(store))
    }

    /// 使用指定的状态存储创建内核
    pub fn with_state_store(config: KernelConfig, store: Arc<dyn ModuleStateStore>) -> Result<Self> {
        config.validate()?;
        info!("初始化马赛克内核 v{}", crate::VERSION);

        let modules = Arc::new(ModuleRegistry::from_config(&config.modules, store));
        let extensions = Arc::new(RwLock::new(ExtensionRegistry::new()));
        let lifecycle = ModuleLifecycleManager::new(Arc::clone(&modules), Arc::clone(&extensions));
        let compiler = PipelineCompiler::new(Arc::clone(&modules), Arc::clone(&extensions), &config)?;
        let runtime = PipelineRuntime::new(Arc::clone(&extensions));

        Ok(Self {
            config,
            state: tokio::sync::RwLock::new(KernelState::Created),
            modules,
            extensions,
            lifecycle,
            compiler,
            runtime,
            entries: HashMap::new(),
            booted: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    /// 注册模块入口实现
    ///
    /// # Arguments
    ///
    /// * `handle` - 入口句柄，对应模块清单的 `entry` 字段（缺省为包名）
    /// * `entry` - 入口实现
    pub fn register_entry(&mut self, handle: impl Into<String>, entry: Arc<dyn ModuleEntry>) {
        let handle = handle.into();
        debug!(handle = %handle, "注册模块入口");
        self.entries.insert(handle, entry);
    }

    /// 引导内核
    ///
    /// 扫描模块目录，清理孤立状态，然后按依赖顺序让每个已安装且已启用的模块注册片段，
    /// 最后依次调用各入口的 `boot`。
    ///
    /// # Returns
    ///
    /// 完成注册的包名，按依赖顺序
    #[instrument(skip(self))]
    pub async fn boot(&self, tenant: Option<&str>) -> Result<Vec<String>> {
        let mut state = self.state.write().await;
        if !state.can_boot() {
            return Err(KernelError::InitFailed(format!(
                "内核当前状态 {:?} 不允许引导",
                *state
            )));
        }

        self.modules.scan().await?;
        self.lifecycle.remove_orphans(tenant).await?;

        let order = self.modules.resolved().await?;
        let installed = self.modules.installed(tenant).await?;
        let mut pending = Vec::new();

        // 先收集全部注册，任何一个失败都不触碰扩展注册表
        for package in order {
            let Some(info) = self.modules.get(&package).await else {
                continue;
            };
            if !installed.get(&package).is_some_and(|s| s.enabled) {
                debug!(package = %package, "模块未安装或未启用，跳过");
                continue;
            }
            let Some(entry) = self.entries.get(&info.metadata.entry) else {
                warn!(package = %package, entry = %info.metadata.entry, "没有对应的模块入口");
                continue;
            };

            let mut ctx = RegistrationContext::new(&package);
            entry.register(&mut ctx)?;
            pending.push((ctx, Arc::clone(entry)));
        }

        let mut registered = Vec::with_capacity(pending.len());
        let mut entries = Vec::with_capacity(pending.len());
        {
            let mut extensions = self.extensions.write();
            for (ctx, entry) in pending {
                let package = ctx.package().to_string();
                let count = ctx.apply(&mut extensions);
                info!(package = %package, fragments = count, "模块已注册");
                registered.push(package);
                entries.push(entry);
            }
        }

        for entry in &entries {
            if let Err(e) = entry.boot().await {
                self.rollback(&registered);
                return Err(e);
            }
        }

        *self.booted.lock().await = registered.clone();
        *state = KernelState::Booted;
        info!(modules = registered.len(), "马赛克内核已引导");
        Ok(registered)
    }

    /// 撤销本次引导写入扩展注册表的片段
    fn rollback(&self, registered: &[String]) {
        let mut extensions = self.extensions.write();
        for package in registered.iter().rev() {
            extensions.unregister_module(package);
        }
        warn!(modules = registered.len(), "引导失败，已撤销模块注册");
    }

    /// 关闭内核，按引导的相反顺序调用各入口的 `destroy`
    pub async fn shutdown(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if !state.is_booted() {
            return Ok(());
        }

        let booted = std::mem::take(&mut *self.booted.lock().await);
        for package in booted.iter().rev() {
            let Some(info) = self.modules.get(package).await else {
                continue;
            };
            if let Some(entry) = self.entries.get(&info.metadata.entry) {
                if let Err(e) = entry.destroy().await {
                    warn!(package = %package, error = %e, "模块销毁失败");
                }
            }
        }

        *state = KernelState::ShutDown;
        info!("马赛克内核已关闭");
        Ok(())
    }

    // ========================================================================
    // 生命周期委托
    // ========================================================================

    /// 安装模块及其依赖
    pub async fn install(&self, package: &str, tenant: Option<&str>) -> Result<Vec<String>> {
        self.lifecycle.install(package, tenant).await
    }

    /// 卸载模块
    pub async fn uninstall(
        &self,
        package: &str,
        tenant: Option<&str>,
        cascade: bool,
        dry_run: bool,
    ) -> Result<Vec<String>> {
        self.lifecycle.uninstall(package, tenant, cascade, dry_run).await
    }

    /// 启用模块
    pub async fn enable(&self, package: &str, tenant: Option<&str>) -> Result<ModuleState> {
        self.lifecycle.enable(package, tenant).await
    }

    /// 停用模块
    pub async fn disable(&self, package: &str, tenant: Option<&str>) -> Result<ModuleState> {
        self.lifecycle.disable(package, tenant).await
    }

    /// 升级模块
    pub async fn upgrade(&self, package: &str, tenant: Option<&str>) -> Result<ModuleState> {
        self.lifecycle.upgrade(package, tenant).await
    }

    // ========================================================================
    // 预编译委托
    // ========================================================================

    /// 编译全部逻辑名
    pub async fn compile_all(&self, lazy: bool) -> Result<CompileReport> {
        self.compiler.compile_all(lazy).await
    }

    /// 编译单个逻辑名
    pub async fn compile_single(&self, logical_name: &str, lazy: bool) -> Result<CompileOutcome> {
        self.compiler
            .compile_single(&LogicalName::new(logical_name), lazy)
            .await
    }

    /// 清除产物缓存
    pub async fn clear_compiled(&self) -> Result<bool> {
        self.compiler.clear_cache().await
    }

    /// 加载产物并链接到当前注册表
    pub async fn compiled(&self, logical_name: &str) -> Result<CompiledPipeline> {
        self.compiler
            .load_compiled(&LogicalName::new(logical_name))
            .await
    }

    // ========================================================================
    // 访问器
    // ========================================================================

    /// 解释执行的管线运行时
    pub fn runtime(&self) -> &PipelineRuntime {
        &self.runtime
    }

    /// 当前状态
    pub async fn state(&self) -> KernelState {
        *self.state.read().await
    }

    /// 配置
    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// 模块注册表
    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }

    /// 扩展注册表
    pub fn extensions(&self) -> &Arc<RwLock<ExtensionRegistry>> {
        &self.extensions
    }

    /// 状态存储
    pub fn store(&self) -> &Arc<dyn ModuleStateStore> {
        self.modules.store()
    }

    /// 生命周期管理器
    pub fn lifecycle(&self) -> &ModuleLifecycleManager {
        &self.lifecycle
    }

    /// 预编译器
    pub fn compiler(&self) -> &PipelineCompiler {
        &self.compiler
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .field("fragments", &self.extensions.read().len())
            .finish()
    }
}

// ============================================================================
// 单元测试
// ============================================================================
