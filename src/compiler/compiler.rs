//! 管线预编译器
//!
//! 为每个逻辑名生成一个产物：合并属性、预先排序方法表、改写方法体，
//! 并在接受片段前执行模块隔离检查。

use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::compiler::artifact::{Artifact, CompiledPipeline, MethodEntry, SourceStamp, ARTIFACT_FORMAT};
use crate::compiler::attributes::merge_attributes;
use crate::compiler::isolation::IsolationChecker;
use crate::compiler::paths::GeneratedPaths;
use crate::compiler::references::ReferenceCollector;
use crate::compiler::rewrite::{extract_method, BodyRewriter};
use crate::core::config::KernelConfig;
use crate::module::ModuleRegistry;
use crate::pipeline::{ExtensionRegistry, Fragment, LogicalName, CONSTRUCTOR};
use crate::utils::error::{KernelError, Result};
use crate::utils::fs::{modified_time, system_time_millis, write_atomic};

/// 单个逻辑名的编译结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileOutcome {
    /// 已重新生成
    Compiled(PathBuf),
    /// 惰性模式下产物仍然新鲜，未重新生成
    Fresh(PathBuf),
}

impl CompileOutcome {
    /// 产物路径
    pub fn path(&self) -> &Path {
        match self {
            CompileOutcome::Compiled(p) | CompileOutcome::Fresh(p) => p,
        }
    }
}

/// 批量编译报告
#[derive(Debug, Default)]
pub struct CompileReport {
    /// 重新生成的逻辑名
    pub compiled: Vec<(LogicalName, PathBuf)>,
    /// 产物新鲜而跳过的逻辑名
    pub skipped: Vec<(LogicalName, PathBuf)>,
    /// 失败的逻辑名（仅宽松模式）
    pub failed: Vec<(LogicalName, KernelError)>,
}

impl CompileReport {
    /// 是否没有失败项
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// 处理的逻辑名总数
    pub fn total(&self) -> usize {
        self.compiled.len() + self.skipped.len() + self.failed.len()
    }
}

/// 一个片段的源码分析结果
struct AnalyzedSource {
    text: String,
    targets: BTreeMap<String, String>,
}

/// 管线预编译器
pub struct PipelineCompiler {
    modules: Arc<ModuleRegistry>,
    extensions: Arc<RwLock<ExtensionRegistry>>,
    paths: GeneratedPaths,
    shared_namespaces: Vec<String>,
    graceful: bool,
    tenant: Option<String>,
    collector: ReferenceCollector,
    rewriter: BodyRewriter,
}

impl PipelineCompiler {
    /// 创建编译器
    pub fn new(
        modules: Arc<ModuleRegistry>,
        extensions: Arc<RwLock<ExtensionRegistry>>,
        config: &KernelConfig,
    ) -> Result<Self> {
        Ok(Self {
            modules,
            extensions,
            paths: GeneratedPaths::new(
                config.compiler.cache_root.clone(),
                config.compiler.generated_namespace.clone(),
            ),
            shared_namespaces: config.shared_namespaces(),
            graceful: config.compiler.graceful,
            tenant: config.modules.default_tenant.clone(),
            collector: ReferenceCollector::new()?,
            rewriter: BodyRewriter::new()?,
        })
    }

    /// 设置批量编译是否宽松
    pub fn set_graceful(&mut self, graceful: bool) {
        self.graceful = graceful;
    }

    /// 设置隔离检查使用的租户
    pub fn set_tenant(&mut self, tenant: Option<String>) {
        self.tenant = tenant;
    }

    /// 路径约定
    pub fn paths(&self) -> &GeneratedPaths {
        &self.paths
    }

    /// 逻辑名下参与编译的片段（注册顺序）
    fn group(&self, logical_name: &LogicalName) -> Result<Vec<Arc<Fragment>>> {
        let registry = self.extensions.read();
        let instances = registry.extensions_for(logical_name);
        let group = if instances.is_empty() {
            registry.static_extensions_for(logical_name)
        } else {
            instances
        };
        if group.is_empty() {
            return Err(KernelError::NoExtensions(logical_name.to_string()));
        }
        Ok(group.to_vec())
    }

    /// 逻辑名对应的产物路径
    pub fn artifact_path(&self, logical_name: &LogicalName) -> Result<PathBuf> {
        let group = self.group(logical_name)?;
        Ok(self.paths.artifact_path(group[0].domain(), logical_name))
    }

    /// 编译全部逻辑名
    ///
    /// 宽松模式下单个逻辑名的失败记入报告，其余逻辑名继续编译；
    /// 否则遇到第一个错误即返回。
    ///
    /// # Arguments
    ///
    /// * `lazy` - 为 `true` 时跳过仍然新鲜的产物
    #[instrument(skip(self))]
    pub async fn compile_all(&self, lazy: bool) -> Result<CompileReport> {
        let started = Instant::now();
        let names = self.extensions.read().logical_names();
        let mut report = CompileReport::default();

        for name in names {
            match self.compile_single(&name, lazy).await {
                Ok(CompileOutcome::Compiled(path)) => report.compiled.push((name, path)),
                Ok(CompileOutcome::Fresh(path)) => report.skipped.push((name, path)),
                Err(e) if self.graceful => {
                    warn!(
                        logical_name = %name,
                        error = %e,
                        error_code = e.error_code(),
                        "逻辑实体编译失败，继续编译其余实体"
                    );
                    report.failed.push((name, e));
                }
                Err(e) => return Err(e),
            }
        }

        info!(
            compiled = report.compiled.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "批量编译完成"
        );
        Ok(report)
    }

    /// 编译单个逻辑名
    ///
    /// # Errors
    ///
    /// - 逻辑名下没有片段时返回 [`KernelError::NoExtensions`]
    /// - 单值属性冲突时返回 [`KernelError::AttributeConflict`]
    /// - 隔离检查失败时返回 [`KernelError::ForeignReference`] 或 [`KernelError::UnavailableModuleReference`]
    #[instrument(skip(self, logical_name), fields(logical_name = %logical_name))]
    pub async fn compile_single(&self, logical_name: &LogicalName, lazy: bool) -> Result<CompileOutcome> {
        let group = self.group(logical_name)?;
        let domain = group[0].domain();
        let path = self.paths.artifact_path(domain, logical_name);

        if lazy && !self.is_stale(logical_name).await? {
            debug!(artifact = %path.display(), "产物仍然新鲜，跳过");
            return Ok(CompileOutcome::Fresh(path));
        }

        let artifact = self.build_artifact(logical_name, &group).await?;
        write_atomic(&path, artifact.to_json()?).await?;

        info!(
            artifact = %path.display(),
            methods = artifact.methods.len(),
            fragments = group.len(),
            "产物已生成"
        );
        Ok(CompileOutcome::Compiled(path))
    }

    async fn build_artifact(&self, logical_name: &LogicalName, group: &[Arc<Fragment>]) -> Result<Artifact> {
        let domain = group[0].domain();
        let type_path = self.paths.generated_type_path(domain, logical_name);
        let checker = {
            let registry = self.extensions.read();
            IsolationChecker::new(
                &self.modules,
                &registry,
                &self.paths,
                self.shared_namespaces.clone(),
                self.tenant.as_deref(),
            )
        };

        let group_types: BTreeSet<String> = group.iter().map(|f| f.type_path().to_string()).collect();
        let mut sources = Vec::new();
        let mut module_versions = BTreeMap::new();
        let mut analyzed: HashMap<String, AnalyzedSource> = HashMap::new();

        for fragment in group {
            let metadata = match fragment.package() {
                Some(package) => Some(self.modules.get_or_fail(package).await?.metadata),
                None => None,
            };
            if let Some(m) = &metadata {
                module_versions.insert(m.package.clone(), m.version.clone());
            }

            let Some(source_path) = fragment.source() else {
                continue;
            };
            let text = tokio::fs::read_to_string(source_path).await.map_err(|e| {
                KernelError::CompileFailed {
                    logical_name: logical_name.to_string(),
                    reason: format!("读取 {} 失败: {}", source_path.display(), e),
                }
            })?;
            let modified_ms = modified_time(source_path)
                .await?
                .map(|t| u64::try_from(system_time_millis(t)).unwrap_or(u64::MAX))
                .unwrap_or_default();
            sources.push(SourceStamp {
                path: source_path.to_path_buf(),
                modified_ms,
            });

            let namespace = metadata.as_ref().map(|m| m.namespace.as_str()).unwrap_or("");
            let references = self.collector.collect(&text, namespace);

            if let Some(m) = &metadata {
                let outside: BTreeSet<String> = references
                    .types
                    .iter()
                    .filter(|t| !group_types.contains(*t))
                    .cloned()
                    .collect();
                checker.check(m, &outside).await?;
            }

            let mut targets: BTreeMap<String, String> = group_types
                .iter()
                .map(|t| (t.clone(), type_path.clone()))
                .collect();
            for (alias, full) in &references.aliases {
                if group_types.contains(full) {
                    targets.insert(alias.clone(), type_path.clone());
                }
            }
            analyzed.insert(fragment.type_path().to_string(), AnalyzedSource { text, targets });
        }

        let attributes = merge_attributes(logical_name, group.iter().map(|f| f.attributes()))?;

        let mut methods: BTreeMap<String, Vec<MethodEntry>> = BTreeMap::new();
        for fragment in group.iter().rev() {
            for (method, decl) in fragment.methods() {
                if method == CONSTRUCTOR || !decl.is_compilable() {
                    continue;
                }
                let body = match analyzed.get(fragment.type_path()) {
                    Some(source) => match extract_method(&source.text, method) {
                        Some(raw) => Some(self.rewriter.rewrite(&raw, &source.targets)?),
                        None => None,
                    },
                    None => None,
                };
                methods.entry(method.to_string()).or_default().push(MethodEntry {
                    fragment: fragment.type_path().to_string(),
                    package: fragment.package().map(str::to_string),
                    body,
                });
            }
        }

        sources.sort();
        Ok(Artifact {
            format: ARTIFACT_FORMAT,
            logical_name: logical_name.clone(),
            domain,
            type_path,
            generated_at: chrono::Utc::now(),
            sources,
            modules: module_versions,
            attributes,
            methods,
        })
    }

    /// 产物是否过期
    ///
    /// 以下任一情况视为过期：产物不存在或无法加载；任一源文件晚于产物修改；
    /// 参与编译的源文件集合或模块集合变化；参与编译的模块版本变化。
    pub async fn is_stale(&self, logical_name: &LogicalName) -> Result<bool> {
        let group = self.group(logical_name)?;
        let path = self.paths.artifact_path(group[0].domain(), logical_name);

        let Some(artifact_modified) = modified_time(&path).await? else {
            return Ok(true);
        };
        let artifact = match Artifact::load(&path).await {
            Ok(artifact) => artifact,
            Err(e) => {
                debug!(artifact = %path.display(), error = %e, "产物无法加载，视为过期");
                return Ok(true);
            }
        };

        let current_sources: BTreeSet<&Path> = group.iter().filter_map(|f| f.source()).collect();
        let recorded_sources: BTreeSet<&Path> = artifact.sources.iter().map(|s| s.path.as_path()).collect();
        if current_sources != recorded_sources {
            debug!(logical_name = %logical_name, "源文件集合变化");
            return Ok(true);
        }

        for stamp in &artifact.sources {
            match modified_time(&stamp.path).await? {
                None => return Ok(true),
                Some(modified) => {
                    let millis = u64::try_from(system_time_millis(modified)).unwrap_or(u64::MAX);
                    if modified > artifact_modified || millis > stamp.modified_ms {
                        debug!(source = %stamp.path.display(), "源文件已修改");
                        return Ok(true);
                    }
                }
            }
        }

        let current_modules: BTreeSet<&str> = group.iter().filter_map(|f| f.package()).collect();
        let recorded_modules: BTreeSet<&str> = artifact.modules.keys().map(String::as_str).collect();
        if current_modules != recorded_modules {
            return Ok(true);
        }
        for (package, version) in &artifact.modules {
            match self.modules.get(package).await {
                Some(info) if info.version() == version => {}
                _ => {
                    debug!(package = %package, "模块版本变化");
                    return Ok(true);
                }
            }
        }

        Ok(false)
    }

    /// 加载产物并链接到当前注册表
    pub async fn load_compiled(&self, logical_name: &LogicalName) -> Result<CompiledPipeline> {
        let path = self.artifact_path(logical_name)?;
        let artifact = Artifact::load(&path).await?;
        let registry = self.extensions.read();
        CompiledPipeline::load(artifact, &registry)
    }

    /// 删除整个产物缓存目录
    ///
    /// # Returns
    ///
    /// 目录原本存在时返回 `true`
    pub async fn clear_cache(&self) -> Result<bool> {
        match tokio::fs::remove_dir_all(self.paths.cache_root()).await {
            Ok(()) => {
                info!(cache_root = %self.paths.cache_root().display(), "产物缓存已清除");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{InMemoryModuleStateStore, ModuleMetadata};
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup(dir: &TempDir) -> (Arc<ModuleRegistry>, Arc<RwLock<ExtensionRegistry>>, PipelineCompiler) {
        let store = Arc::new(InMemoryModuleStateStore::new());
        let modules = Arc::new(ModuleRegistry::new(vec![], vec![], store));
        for (package, ns) in [("acme/base", "acme_base"), ("acme/shop", "acme_shop")] {
            modules
                .register_with_metadata(
                    ModuleMetadata::new(package, package, "1.0.0").with_namespace(ns),
                    dir.path().join(ns),
                )
                .await
                .unwrap();
        }
        let extensions = Arc::new(RwLock::new(ExtensionRegistry::new()));
        let config = KernelConfig::builder()
            .cache_root(dir.path().join("cache"))
            .build();
        let compiler = PipelineCompiler::new(Arc::clone(&modules), Arc::clone(&extensions), &config).unwrap();
        (modules, extensions, compiler)
    }

    #[tokio::test]
    async fn test_compile_orders_declared_methods() {
        let dir = TempDir::new().unwrap();
        let (_, extensions, compiler) = setup(&dir).await;

        let base = Fragment::builder("acme_base::models::Widget")
            .package("acme/base")
            .method("new", |_, _, _| Ok(json!(null)))
            .method("price", |_, _, _| Ok(json!(10)))
            .method("label", |_, _, _| Ok(json!("w")))
            .attribute("fillable", json!(["name"]))
            .build();
        let shop = Fragment::builder("acme_shop::models::Widget")
            .package("acme/shop")
            .extends(&base)
            .method("price", |next, entity, args| next.call(entity, args))
            .attribute("fillable", json!(["name", "sku"]))
            .build();
        {
            let mut registry = extensions.write();
            registry.register(Arc::new(base), "widget");
            registry.register(Arc::new(shop), "widget");
        }

        let name = LogicalName::new("widget");
        let outcome = compiler.compile_single(&name, false).await.unwrap();
        let artifact = Artifact::load(outcome.path()).await.unwrap();

        assert_eq!(artifact.type_path, "mosaic::models::Widget");
        assert_eq!(artifact.attributes["fillable"], json!(["name", "sku"]));
        assert!(!artifact.methods.contains_key("new"));
        let price: Vec<&str> = artifact.methods["price"].iter().map(|e| e.fragment.as_str()).collect();
        assert_eq!(price, vec!["acme_shop::models::Widget", "acme_base::models::Widget"]);
        let label: Vec<&str> = artifact.methods["label"].iter().map(|e| e.fragment.as_str()).collect();
        assert_eq!(label, vec!["acme_base::models::Widget"]);
        assert_eq!(artifact.modules.len(), 2);
    }

    #[tokio::test]
    async fn test_graceful_batch_continues() {
        let dir = TempDir::new().unwrap();
        let (_, extensions, mut compiler) = setup(&dir).await;
        {
            let mut registry = extensions.write();
            registry.register(
                Arc::new(Fragment::builder("acme_base::models::Order").package("acme/base").attribute("table", json!("a")).build()),
                "order",
            );
            registry.register(
                Arc::new(Fragment::builder("acme_shop::models::Order").package("acme/shop").attribute("table", json!("b")).build()),
                "order",
            );
            registry.register(
                Arc::new(Fragment::builder("acme_base::models::Line").package("acme/base").method("qty", |_, _, _| Ok(json!(1))).build()),
                "line",
            );
        }

        let report = compiler.compile_all(false).await.unwrap();
        assert_eq!(report.compiled.len(), 1);
        assert_eq!(report.failed.len(), 1);
        assert!(matches!(report.failed[0].1, KernelError::AttributeConflict { .. }));
        assert!(!report.is_success());

        compiler.set_graceful(false);
        assert!(compiler.compile_all(false).await.is_err());
    }

    #[tokio::test]
    async fn test_clear_cache_and_missing_group() {
        let dir = TempDir::new().unwrap();
        let (_, extensions, compiler) = setup(&dir).await;
        extensions.write().register(
            Arc::new(Fragment::builder("acme_base::models::Line").package("acme/base").build()),
            "line",
        );
        compiler.compile_all(false).await.unwrap();
        assert!(compiler.clear_cache().await.unwrap());
        assert!(!compiler.clear_cache().await.unwrap());

        let err = compiler
            .compile_single(&LogicalName::new("ghost"), false)
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::NoExtensions(_)));
    }
}
