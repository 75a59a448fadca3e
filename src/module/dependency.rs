//! 模块依赖管理
//!
//! 本模块提供模块依赖关系的图结构和解析器。
//!
//! # 主要组件
//!
//! - [`DependencyGraph`] - 依赖关系图（模块 → 被依赖模块）
//! - [`Resolver`] - 确定性拓扑排序，支持全图解析和单节点传递解析
//! - [`ReverseGraph`] - 反向依赖视图，只记录已安装的依赖者
//! - [`UninstallResolver`] - 卸载规划，可选级联卸载
//!
//! # 示例
//!
//! ```rust
//! use mosaic_core::module::dependency::{DependencyGraph, Resolver};
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_dependency("acme/sales", "acme/base");
//! graph.add_dependency("acme/crm", "acme/base");
//!
//! let order = Resolver::new(&graph).resolve().unwrap();
//! assert_eq!(order, vec!["acme/base", "acme/crm", "acme/sales"]);
//! ```

use std::collections::{HashMap, HashSet};

use semver::Version;
use tracing::{debug, warn};

use crate::module::metadata::ModuleMetadata;
use crate::utils::error::{KernelError, Result};

/// 模块依赖关系图
///
/// 邻接表按插入顺序保存边，允许重复边；遍历时视为集合。
/// 哈希表本身没有顺序，遍历方需要先对节点排序。
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: HashMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// 创建一个空的依赖图
    pub fn new() -> Self {
        Self::default()
    }

    /// 由模块元数据构建依赖图
    ///
    /// 必需依赖总是成边，目标即使不是已知模块也会作为节点加入；
    /// 可选依赖只在目标模块存在于 `modules` 中时成边。
    ///
    /// # 示例
    ///
    /// ```rust
    /// use mosaic_core::module::dependency::DependencyGraph;
    /// use mosaic_core::module::metadata::{Dependency, ModuleMetadata};
    ///
    /// let sales = ModuleMetadata::new("acme/sales", "Sales", "1.0.0")
    ///     .with_dependency(Dependency::new("acme/base", "^1"))
    ///     .with_dependency(Dependency::new("acme/crm", "*").optional());
    ///
    /// let graph = DependencyGraph::from_modules([&sales]);
    /// assert!(graph.contains("acme/base"));
    /// assert!(!graph.contains("acme/crm"));
    /// ```
    pub fn from_modules<'a>(modules: impl IntoIterator<Item = &'a ModuleMetadata>) -> Self {
        let modules: Vec<&ModuleMetadata> = modules.into_iter().collect();
        let present: HashSet<&str> = modules.iter().map(|m| m.package.as_str()).collect();

        let mut graph = Self::new();
        for module in &modules {
            graph.add_node(&module.package);
            for dep in &module.dependencies {
                if dep.optional && !present.contains(dep.package.as_str()) {
                    debug!(package = %module.package, dependency = %dep.package, "跳过缺失的可选依赖");
                    continue;
                }
                graph.add_dependency(&module.package, &dep.package);
            }
        }
        graph
    }

    /// 添加节点，已存在时不做任何事
    pub fn add_node(&mut self, id: &str) {
        if !self.edges.contains_key(id) {
            self.edges.insert(id.to_string(), Vec::new());
        }
    }

    /// 添加依赖关系：`id` 依赖 `depends_on`
    ///
    /// 两端都会作为节点加入。重复边被保留，解析时按集合处理。
    pub fn add_dependency(&mut self, id: &str, depends_on: &str) {
        self.add_node(depends_on);
        self.edges
            .entry(id.to_string())
            .or_default()
            .push(depends_on.to_string());
    }

    /// 完整邻接表
    pub fn edges(&self) -> &HashMap<String, Vec<String>> {
        &self.edges
    }

    /// 节点的直接依赖（原始顺序，可能有重复）
    pub fn dependencies_of(&self, id: &str) -> &[String] {
        self.edges.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 是否包含节点
    pub fn contains(&self, id: &str) -> bool {
        self.edges.contains_key(id)
    }

    /// 节点数
    pub fn node_count(&self) -> usize {
        self.edges.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// 按字典序排列的全部节点
    pub fn sorted_nodes(&self) -> Vec<&str> {
        let mut nodes: Vec<&str> = self.edges.keys().map(String::as_str).collect();
        nodes.sort_unstable();
        nodes
    }

    /// 按字典序排列并去重的直接依赖
    fn sorted_dependencies(&self, id: &str) -> Vec<&str> {
        let mut deps: Vec<&str> = self.dependencies_of(id).iter().map(String::as_str).collect();
        deps.sort_unstable();
        deps.dedup();
        deps
    }
}

/// 依赖解析器
///
/// 基于深度优先遍历的拓扑排序。节点和边都按字典序访问，
/// 同一个图的多次解析结果完全一致。
///
/// 对每条边 `a → b`，结果中 `b` 总是排在 `a` 之前。
#[derive(Debug)]
pub struct Resolver<'g> {
    graph: &'g DependencyGraph,
    visited: HashSet<String>,
    visiting: HashSet<String>,
    stack: Vec<String>,
    result: Vec<String>,
}

impl<'g> Resolver<'g> {
    /// 创建解析器
    pub fn new(graph: &'g DependencyGraph) -> Self {
        Self {
            graph,
            visited: HashSet::new(),
            visiting: HashSet::new(),
            stack: Vec::new(),
            result: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.visited.clear();
        self.visiting.clear();
        self.stack.clear();
        self.result.clear();
    }

    /// 解析整个图
    ///
    /// # Returns
    ///
    /// 图中全部节点的拓扑序
    ///
    /// # Errors
    ///
    /// 存在环时返回 `CircularDependency`
    pub fn resolve(&mut self) -> Result<Vec<String>> {
        self.reset();
        let graph = self.graph;
        for node in graph.sorted_nodes() {
            if !self.visited.contains(node) {
                self.visit(node)?;
            }
        }
        Ok(std::mem::take(&mut self.result))
    }

    /// 解析单个节点及其传递依赖
    ///
    /// # Returns
    ///
    /// `{id} ∪ 传递依赖` 的拓扑序，`id` 位于最后
    ///
    /// # Errors
    ///
    /// - `id` 不在图中时返回 `UnknownModule`
    /// - 可达范围内存在环时返回 `CircularDependency`
    pub fn resolve_for(&mut self, id: &str) -> Result<Vec<String>> {
        self.reset();
        if !self.graph.contains(id) {
            return Err(KernelError::UnknownModule(id.to_string()));
        }
        self.visit(id)?;
        Ok(std::mem::take(&mut self.result))
    }

    fn visit(&mut self, node: &str) -> Result<()> {
        if self.visiting.contains(node) {
            let start = self.stack.iter().position(|n| n == node).unwrap_or(0);
            let mut cycle: Vec<&str> = self.stack[start..].iter().map(String::as_str).collect();
            cycle.push(node);
            warn!(node = %node, cycle = %cycle.join(" -> "), "检测到循环依赖");
            return Err(KernelError::CircularDependency(node.to_string()));
        }
        if self.visited.contains(node) {
            return Ok(());
        }

        self.visiting.insert(node.to_string());
        self.stack.push(node.to_string());

        let graph = self.graph;
        for dep in graph.sorted_dependencies(node) {
            self.visit(dep)?;
        }

        self.stack.pop();
        self.visiting.remove(node);
        self.visited.insert(node.to_string());
        self.result.push(node.to_string());
        Ok(())
    }
}

/// 反向依赖图
///
/// 记录"谁依赖我"，只包含已安装的依赖者。未安装的模块不会阻止卸载。
#[derive(Debug, Clone, Default)]
pub struct ReverseGraph {
    dependents: HashMap<String, Vec<String>>,
}

impl ReverseGraph {
    /// 由依赖图构建
    ///
    /// # Arguments
    ///
    /// * `graph` - 正向依赖图
    /// * `is_installed` - 判断包是否已安装
    pub fn from_graph(graph: &DependencyGraph, is_installed: impl Fn(&str) -> bool) -> Self {
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for (pkg, deps) in graph.edges() {
            if !is_installed(pkg) {
                continue;
            }
            for dep in deps {
                let entry = dependents.entry(dep.clone()).or_default();
                if !entry.contains(pkg) {
                    entry.push(pkg.clone());
                }
            }
        }
        for list in dependents.values_mut() {
            list.sort_unstable();
        }
        Self { dependents }
    }

    /// 直接依赖者（字典序）
    pub fn dependents_of(&self, pkg: &str) -> Vec<String> {
        self.dependents.get(pkg).cloned().unwrap_or_default()
    }

    /// 级联收集全部传递依赖者，按安全卸载顺序返回
    ///
    /// 后序遍历：一个依赖者只有在它自己的全部依赖者之后才加入，
    /// `pkg` 本身位于最后。
    pub fn cascade_from(&self, pkg: &str) -> Vec<String> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        self.collect(pkg, &mut visited, &mut order);
        order
    }

    fn collect(&self, pkg: &str, visited: &mut HashSet<String>, order: &mut Vec<String>) {
        if !visited.insert(pkg.to_string()) {
            return;
        }
        if let Some(dependents) = self.dependents.get(pkg) {
            for dependent in dependents {
                self.collect(dependent, visited, order);
            }
        }
        order.push(pkg.to_string());
    }
}

/// 卸载规划器
#[derive(Debug, Clone)]
pub struct UninstallResolver {
    reverse: ReverseGraph,
}

impl UninstallResolver {
    /// 基于反向依赖图创建
    pub fn new(reverse: ReverseGraph) -> Self {
        Self { reverse }
    }

    /// 计算卸载计划
    ///
    /// - 非级联且存在已安装的依赖者：返回 `BlockedByDependents`
    /// - 级联：返回 `cascade_from(pkg)`
    /// - 其余情况：只卸载 `pkg`
    pub fn resolve(&self, pkg: &str, cascade: bool) -> Result<Vec<String>> {
        if cascade {
            return Ok(self.reverse.cascade_from(pkg));
        }

        let dependents = self.reverse.dependents_of(pkg);
        if !dependents.is_empty() {
            return Err(KernelError::BlockedByDependents {
                module: pkg.to_string(),
                dependents,
            });
        }
        Ok(vec![pkg.to_string()])
    }

    /// 反向依赖图
    pub fn reverse_graph(&self) -> &ReverseGraph {
        &self.reverse
    }
}

/// 检查解析结果中每个模块的依赖版本要求
///
/// # Arguments
///
/// * `order` - 解析得到的包名序列
/// * `modules` - 已知模块的元数据
///
/// # Errors
///
/// - 必需依赖不存在时返回 `DependencyNotFound`
/// - 版本不满足要求时返回 `VersionMismatch`
pub fn check_version_requirements(
    order: &[String],
    modules: &HashMap<String, ModuleMetadata>,
) -> Result<()> {
    for pkg in order {
        let module = modules
            .get(pkg)
            .ok_or_else(|| KernelError::DependencyNotFound(pkg.clone()))?;

        for dep in &module.dependencies {
            let Some(target) = modules.get(&dep.package) else {
                if dep.optional {
                    continue;
                }
                return Err(KernelError::DependencyNotFound(dep.package.clone()));
            };

            let found = Version::parse(&target.version)?;
            if !dep.version_matches(&found) {
                return Err(KernelError::VersionMismatch {
                    module: dep.package.clone(),
                    required: dep.version.clone(),
                    found: target.version.clone(),
                });
            }
        }
    }
    Ok(())
}
