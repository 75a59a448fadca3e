//! 模块状态持久化
//!
//! 每个 (包名, 租户) 对应一条 [`ModuleState`] 记录：安装时创建，
//! 启用/停用/升级时修改，卸载时删除。内核只通过 [`ModuleStateStore`]
//! 接口读写状态，存储格式由实现决定。
//!
//! - [`JsonModuleStateStore`] - JSON 文件存储，临时文件加原子重命名写入
//! - [`InMemoryModuleStateStore`] - 内存存储，用于测试和演练

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::utils::error::{KernelError, Result};
use crate::utils::fs::write_atomic;

/// 单个模块在某租户下的持久化状态
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleState {
    /// 包名
    pub package: String,

    /// 安装时（或最近一次升级时）的版本
    pub version: String,

    /// 租户，`None` 表示全局
    #[serde(default)]
    pub tenant: Option<String>,

    /// 是否启用
    pub enabled: bool,

    /// 安装时间
    pub installed_at: DateTime<Utc>,

    /// 最近启用时间
    #[serde(default)]
    pub enabled_at: Option<DateTime<Utc>>,

    /// 最近停用时间
    #[serde(default)]
    pub disabled_at: Option<DateTime<Utc>>,

    /// 最近更新时间
    pub updated_at: DateTime<Utc>,
}

impl ModuleState {
    fn installed(package: &str, version: &str, tenant: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            package: package.to_string(),
            version: version.to_string(),
            tenant: tenant.map(str::to_string),
            enabled: true,
            installed_at: now,
            enabled_at: Some(now),
            disabled_at: None,
            updated_at: now,
        }
    }
}

/// 模块状态存储接口
///
/// 所有操作都以 (包名, 租户) 为键。
#[async_trait]
pub trait ModuleStateStore: Send + Sync {
    /// 租户下全部模块状态
    async fn all(&self, tenant: Option<&str>) -> Result<HashMap<String, ModuleState>>;

    /// 查询单个模块状态
    async fn get(&self, package: &str, tenant: Option<&str>) -> Result<Option<ModuleState>>;

    /// 记录安装，新安装的模块默认启用
    async fn install(&self, package: &str, version: &str, tenant: Option<&str>)
        -> Result<ModuleState>;

    /// 启用
    async fn enable(&self, package: &str, tenant: Option<&str>) -> Result<ModuleState>;

    /// 停用
    async fn disable(&self, package: &str, tenant: Option<&str>) -> Result<ModuleState>;

    /// 升级到新版本
    async fn upgrade(&self, package: &str, version: &str, tenant: Option<&str>)
        -> Result<ModuleState>;

    /// 删除记录，返回记录是否存在
    async fn uninstall(&self, package: &str, tenant: Option<&str>) -> Result<bool>;
}

/// 状态表键：全局为 `package`，租户为 `package@tenant`
fn state_key(package: &str, tenant: Option<&str>) -> String {
    match tenant {
        Some(t) => format!("{}@{}", package, t),
        None => package.to_string(),
    }
}

/// 两种存储共用的状态表
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(transparent)]
struct StateTable {
    entries: BTreeMap<String, ModuleState>,
}

impl StateTable {
    fn all(&self, tenant: Option<&str>) -> HashMap<String, ModuleState> {
        self.entries
            .values()
            .filter(|s| s.tenant.as_deref() == tenant)
            .map(|s| (s.package.clone(), s.clone()))
            .collect()
    }

    fn get(&self, package: &str, tenant: Option<&str>) -> Option<ModuleState> {
        self.entries.get(&state_key(package, tenant)).cloned()
    }

    fn install(&mut self, package: &str, version: &str, tenant: Option<&str>) -> ModuleState {
        let state = ModuleState::installed(package, version, tenant);
        self.entries
            .insert(state_key(package, tenant), state.clone());
        state
    }

    fn update(
        &mut self,
        package: &str,
        tenant: Option<&str>,
        apply: impl FnOnce(&mut ModuleState, DateTime<Utc>),
    ) -> Result<ModuleState> {
        let state = self
            .entries
            .get_mut(&state_key(package, tenant))
            .ok_or_else(|| KernelError::ModuleNotInstalled {
                module: package.to_string(),
                tenant: tenant.map(str::to_string),
            })?;
        let now = Utc::now();
        apply(state, now);
        state.updated_at = now;
        Ok(state.clone())
    }

    fn enable(&mut self, package: &str, tenant: Option<&str>) -> Result<ModuleState> {
        self.update(package, tenant, |s, now| {
            s.enabled = true;
            s.enabled_at = Some(now);
        })
    }

    fn disable(&mut self, package: &str, tenant: Option<&str>) -> Result<ModuleState> {
        self.update(package, tenant, |s, now| {
            s.enabled = false;
            s.disabled_at = Some(now);
        })
    }

    fn upgrade(&mut self, package: &str, version: &str, tenant: Option<&str>) -> Result<ModuleState> {
        self.update(package, tenant, |s, _| s.version = version.to_string())
    }

    fn uninstall(&mut self, package: &str, tenant: Option<&str>) -> bool {
        self.entries.remove(&state_key(package, tenant)).is_some()
    }
}

// ============================================================================
// 内存存储
// ============================================================================

/// 内存状态存储
#[derive(Debug, Default, Clone)]
pub struct InMemoryModuleStateStore {
    table: Arc<RwLock<StateTable>>,
}

impl InMemoryModuleStateStore {
    /// 创建空存储
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ModuleStateStore for InMemoryModuleStateStore {
    async fn all(&self, tenant: Option<&str>) -> Result<HashMap<String, ModuleState>> {
        Ok(self.table.read().await.all(tenant))
    }

    async fn get(&self, package: &str, tenant: Option<&str>) -> Result<Option<ModuleState>> {
        Ok(self.table.read().await.get(package, tenant))
    }

    async fn install(
        &self,
        package: &str,
        version: &str,
        tenant: Option<&str>,
    ) -> Result<ModuleState> {
        Ok(self.table.write().await.install(package, version, tenant))
    }

    async fn enable(&self, package: &str, tenant: Option<&str>) -> Result<ModuleState> {
        self.table.write().await.enable(package, tenant)
    }

    async fn disable(&self, package: &str, tenant: Option<&str>) -> Result<ModuleState> {
        self.table.write().await.disable(package, tenant)
    }

    async fn upgrade(
        &self,
        package: &str,
        version: &str,
        tenant: Option<&str>,
    ) -> Result<ModuleState> {
        self.table.write().await.upgrade(package, version, tenant)
    }

    async fn uninstall(&self, package: &str, tenant: Option<&str>) -> Result<bool> {
        Ok(self.table.write().await.uninstall(package, tenant))
    }
}

// ============================================================================
// JSON 文件存储
// ============================================================================

/// JSON 文件状态存储
///
/// 打开时读入整个文件，每次修改后整体写回。写回使用临时文件加原子重命名。
#[derive(Debug, Clone)]
pub struct JsonModuleStateStore {
    path: PathBuf,
    table: Arc<RwLock<StateTable>>,
}

impl JsonModuleStateStore {
    /// 打开状态文件，文件不存在时视为空表
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let table = match tokio::fs::read_to_string(&path).await {
            Ok(content) if content.trim().is_empty() => StateTable::default(),
            Ok(content) => serde_json::from_str(&content)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateTable::default(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), entries = table.entries.len(), "已加载模块状态文件");
        Ok(Self {
            path,
            table: Arc::new(RwLock::new(table)),
        })
    }

    /// 状态文件路径
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, table: &StateTable) -> Result<()> {
        let json = serde_json::to_string_pretty(table)?;
        write_atomic(&self.path, json).await
    }

    /// 在表的副本上修改并写回，写回成功后才替换内存中的表
    async fn commit<T, F>(&self, change: F) -> Result<T>
    where
        T: Send,
        F: FnOnce(&mut StateTable) -> Result<T> + Send,
    {
        let mut table = self.table.write().await;
        let mut draft = table.clone();
        let out = change(&mut draft)?;
        self.persist(&draft).await?;
        *table = draft;
        Ok(out)
    }
}

#[async_trait]
impl ModuleStateStore for JsonModuleStateStore {
    async fn all(&self, tenant: Option<&str>) -> Result<HashMap<String, ModuleState>> {
        Ok(self.table.read().await.all(tenant))
    }

    async fn get(&self, package: &str, tenant: Option<&str>) -> Result<Option<ModuleState>> {
        Ok(self.table.read().await.get(package, tenant))
    }

    async fn install(
        &self,
        package: &str,
        version: &str,
        tenant: Option<&str>,
    ) -> Result<ModuleState> {
        let state = self
            .commit(|table| Ok(table.install(package, version, tenant)))
            .await?;
        info!(package = %package, version = %version, tenant = ?tenant, "模块状态已记录为安装");
        Ok(state)
    }

    async fn enable(&self, package: &str, tenant: Option<&str>) -> Result<ModuleState> {
        self.commit(|table| table.enable(package, tenant)).await
    }

    async fn disable(&self, package: &str, tenant: Option<&str>) -> Result<ModuleState> {
        self.commit(|table| table.disable(package, tenant)).await
    }

    async fn upgrade(
        &self,
        package: &str,
        version: &str,
        tenant: Option<&str>,
    ) -> Result<ModuleState> {
        self.commit(|table| table.upgrade(package, version, tenant)).await
    }

    async fn uninstall(&self, package: &str, tenant: Option<&str>) -> Result<bool> {
        if self.table.read().await.get(package, tenant).is_none() {
            return Ok(false);
        }
        let existed = self
            .commit(|table| Ok(table.uninstall(package, tenant)))
            .await?;
        info!(package = %package, tenant = ?tenant, "模块状态已删除");
        Ok(existed)
    }
}
