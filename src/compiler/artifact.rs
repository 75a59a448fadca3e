//! 生成产物
//!
//! 产物是 JSON 文档，记录合并后的属性和预先排好序的方法表。
//! 加载时按片段类型路径链接到注册表中的处理函数，调用期不再筛选片段。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::pipeline::{
    DomainType, Entity, ExtensionRegistry, LogicalName, MethodFn, Next,
};
use crate::utils::error::{KernelError, Result};

/// 产物格式版本
pub const ARTIFACT_FORMAT: u32 = 1;

/// 参与编译的源文件
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceStamp {
    /// 源文件路径
    pub path: PathBuf,
    /// 编译时的修改时间（Unix 毫秒）
    pub modified_ms: u64,
}

/// 方法表中的一层
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodEntry {
    /// 声明该方法的片段类型路径
    pub fragment: String,
    /// 声明模块
    #[serde(default)]
    pub package: Option<String>,
    /// 改写后的方法源码
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// 生成产物
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// 格式版本
    pub format: u32,
    /// 逻辑名
    pub logical_name: LogicalName,
    /// 领域类型
    pub domain: DomainType,
    /// 生成类型路径
    pub type_path: String,
    /// 生成时间
    pub generated_at: DateTime<Utc>,
    /// 参与编译的源文件
    #[serde(default)]
    pub sources: Vec<SourceStamp>,
    /// 参与编译的模块及其版本
    #[serde(default)]
    pub modules: BTreeMap<String, String>,
    /// 合并后的声明式属性
    #[serde(default)]
    pub attributes: Map<String, Value>,
    /// 方法表，每个方法的层按执行顺序排列（最外层在前）
    #[serde(default)]
    pub methods: BTreeMap<String, Vec<MethodEntry>>,
}

impl Artifact {
    /// 从文件加载
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read(path).await?;
        let artifact: Artifact = serde_json::from_slice(&content).map_err(|e| {
            KernelError::InvalidArtifact(format!("{}: {}", path.display(), e))
        })?;
        if artifact.format != ARTIFACT_FORMAT {
            return Err(KernelError::InvalidArtifact(format!(
                "{}: 不支持的格式版本 {}",
                path.display(),
                artifact.format
            )));
        }
        Ok(artifact)
    }

    /// 序列化为格式化的 JSON
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// 方法表中的全部方法名
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

/// 已链接的预编译管线
pub struct CompiledPipeline {
    artifact: Artifact,
    table: HashMap<String, Vec<MethodFn>>,
}

impl CompiledPipeline {
    /// 把产物链接到注册表中的处理函数
    ///
    /// # Errors
    ///
    /// 方法表引用的片段或方法不在注册表中时返回 [`KernelError::InvalidArtifact`]，
    /// 通常意味着产物已过期，需要重新编译。
    pub fn load(artifact: Artifact, registry: &ExtensionRegistry) -> Result<Self> {
        let mut table = HashMap::with_capacity(artifact.methods.len());

        for (method, entries) in &artifact.methods {
            let mut handlers = Vec::with_capacity(entries.len());
            for entry in entries {
                let (_, fragment) = registry.find_fragment(&entry.fragment).ok_or_else(|| {
                    KernelError::InvalidArtifact(format!(
                        "{}: 片段 '{}' 未注册",
                        artifact.logical_name, entry.fragment
                    ))
                })?;
                let decl = fragment.method(method).ok_or_else(|| {
                    KernelError::InvalidArtifact(format!(
                        "{}: 片段 '{}' 没有方法 '{}'",
                        artifact.logical_name, entry.fragment, method
                    ))
                })?;
                handlers.push(Arc::clone(&decl.handler));
            }
            table.insert(method.clone(), handlers);
        }

        debug!(
            logical_name = %artifact.logical_name,
            methods = table.len(),
            "预编译管线已链接"
        );
        Ok(Self { artifact, table })
    }

    /// 通过预计算的方法表分发
    ///
    /// 方法不在表中，或最后一层仍调用 `next.call(..)` 时，落到 `base`。
    pub fn call<F>(&self, entity: &mut Entity, method: &str, args: &[Value], base: F) -> Result<Value>
    where
        F: Fn(&mut Entity, &[Value]) -> Result<Value> + Send + Sync,
    {
        match self.table.get(method) {
            Some(handlers) => Next::new(method, handlers).with_base(&base).call(entity, args),
            None => base(entity, args),
        }
    }

    /// 方法是否在管线中
    pub fn has(&self, method: &str) -> bool {
        self.table.contains_key(method)
    }

    /// 合并后的声明式属性
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.artifact.attributes
    }

    /// 生成类型路径
    pub fn type_path(&self) -> &str {
        &self.artifact.type_path
    }

    /// 原始产物
    pub fn artifact(&self) -> &Artifact {
        &self.artifact
    }
}

impl std::fmt::Debug for CompiledPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledPipeline")
            .field("logical_name", &self.artifact.logical_name)
            .field("methods", &self.table.keys().collect::<Vec<_>>())
            .finish()
    }
}
