//! 扩展注册表
//!
//! 按逻辑名保存各模块注册的片段，顺序即注册顺序。
//! 模块按依赖顺序注册，因此越靠后的片段越处于管线外层。

use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::pipeline::fragment::Fragment;
use crate::pipeline::logical_name::LogicalName;

/// 扩展注册表
#[derive(Debug, Default)]
pub struct ExtensionRegistry {
    instances: HashMap<LogicalName, Vec<Arc<Fragment>>>,
    statics: HashMap<LogicalName, Vec<Arc<Fragment>>>,
    types: HashMap<String, (LogicalName, Arc<Fragment>)>,
}

impl ExtensionRegistry {
    /// 创建空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 为逻辑名追加一个实例片段
    ///
    /// 同一逻辑名下已有相同类型路径的片段时忽略，已有顺序不变。
    ///
    /// # Arguments
    ///
    /// * `fragment` - 片段
    /// * `logical_name` - 逻辑名
    ///
    /// # Returns
    ///
    /// 是否实际追加
    pub fn register(&mut self, fragment: Arc<Fragment>, logical_name: impl Into<LogicalName>) -> bool {
        let logical_name = logical_name.into();
        let list = self.instances.entry(logical_name.clone()).or_default();
        if contains_type(list, fragment.type_path()) {
            debug!(
                logical_name = %logical_name,
                fragment = %fragment.type_path(),
                "实例片段已注册，忽略"
            );
            return false;
        }
        debug!(
            logical_name = %logical_name,
            fragment = %fragment.type_path(),
            package = fragment.package().unwrap_or("-"),
            "注册实例片段"
        );
        list.push(Arc::clone(&fragment));
        self.types
            .insert(fragment.type_path().to_string(), (logical_name, fragment));
        true
    }

    /// 为逻辑名追加一个静态片段，规则同 [`ExtensionRegistry::register`]
    pub fn register_static(&mut self, fragment: Arc<Fragment>, logical_name: impl Into<LogicalName>) -> bool {
        let logical_name = logical_name.into();
        let list = self.statics.entry(logical_name.clone()).or_default();
        if contains_type(list, fragment.type_path()) {
            return false;
        }
        debug!(
            logical_name = %logical_name,
            fragment = %fragment.type_path(),
            "注册静态片段"
        );
        list.push(Arc::clone(&fragment));
        self.types
            .entry(fragment.type_path().to_string())
            .or_insert((logical_name, fragment));
        true
    }

    /// 逻辑名下的实例片段，按注册顺序
    pub fn extensions_for(&self, logical_name: &LogicalName) -> &[Arc<Fragment>] {
        self.instances
            .get(logical_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 逻辑名下的静态片段，按注册顺序
    pub fn static_extensions_for(&self, logical_name: &LogicalName) -> &[Arc<Fragment>] {
        self.statics
            .get(logical_name)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 最早注册的实例片段
    pub fn first_extension_for(&self, logical_name: &LogicalName) -> Option<&Arc<Fragment>> {
        self.extensions_for(logical_name).first()
    }

    /// 是否有任何片段注册到该逻辑名
    pub fn has_extensions(&self, logical_name: &LogicalName) -> bool {
        !self.extensions_for(logical_name).is_empty()
            || !self.static_extensions_for(logical_name).is_empty()
    }

    /// 全部逻辑名（排序）
    pub fn logical_names(&self) -> Vec<LogicalName> {
        let mut names: Vec<LogicalName> = self
            .instances
            .keys()
            .chain(self.statics.keys())
            .cloned()
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// 按类型路径查找片段及其逻辑名
    pub fn find_fragment(&self, type_path: &str) -> Option<(&LogicalName, &Arc<Fragment>)> {
        self.types.get(type_path).map(|(name, fragment)| (name, fragment))
    }

    /// 全部已注册片段及其逻辑名，按类型路径索引
    pub fn fragments(&self) -> impl Iterator<Item = (&LogicalName, &Arc<Fragment>)> {
        self.types.values().map(|(name, fragment)| (name, fragment))
    }

    /// 该类型是否为已注册的抽象片段
    pub fn is_abstract_type(&self, type_path: &str) -> bool {
        self.types
            .get(type_path)
            .map(|(_, fragment)| fragment.is_abstract())
            .unwrap_or(false)
    }

    /// 某个模块注册的全部实例片段及其逻辑名
    pub fn fragments_of_module(&self, package: &str) -> Vec<(LogicalName, Arc<Fragment>)> {
        let mut found: Vec<(LogicalName, Arc<Fragment>)> = self
            .instances
            .iter()
            .flat_map(|(name, list)| {
                list.iter()
                    .filter(|f| f.package() == Some(package))
                    .map(move |f| (name.clone(), Arc::clone(f)))
            })
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
    }

    /// 卸载某个模块的全部片段，其余片段保持相对顺序
    ///
    /// # Returns
    ///
    /// 被移除的片段数量
    pub fn unregister_module(&mut self, package: &str) -> usize {
        let mut removed = 0;
        for map in [&mut self.instances, &mut self.statics] {
            for list in map.values_mut() {
                let before = list.len();
                list.retain(|f| f.package() != Some(package));
                removed += before - list.len();
            }
            map.retain(|_, list| !list.is_empty());
        }
        self.types
            .retain(|_, (_, fragment)| fragment.package() != Some(package));

        if removed > 0 {
            info!(package = %package, removed, "已卸载模块片段");
        }
        removed
    }

    /// 实例片段总数
    pub fn len(&self) -> usize {
        self.instances.values().map(Vec::len).sum()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty() && self.statics.is_empty()
    }
}

fn contains_type(list: &[Arc<Fragment>], type_path: &str) -> bool {
    list.iter().any(|f| f.type_path() == type_path)
}
