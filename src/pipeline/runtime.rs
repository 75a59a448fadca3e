//! 管线运行时
//!
//! 解释执行模式：每次分发时按注册顺序倒序筛选实现了目标方法的片段，
//! 在筛选结果上建立游标并调用第一层。

use parking_lot::RwLock;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::pipeline::cursor::{BaseFn, Next, StaticNext};
use crate::pipeline::entity::Entity;
use crate::pipeline::fragment::{MethodFn, StaticFn};
use crate::pipeline::logical_name::{snake_case, LogicalName};
use crate::pipeline::registry::ExtensionRegistry;
use crate::utils::error::{KernelError, Result};

/// 查询作用域方法名前缀
pub const SCOPE_PREFIX: &str = "scope_";

/// 属性读取器方法名
pub fn getter_name(attribute: &str) -> String {
    format!("get_{}_attribute", snake_case(attribute))
}

/// 属性写入器方法名
pub fn setter_name(attribute: &str) -> String {
    format!("set_{}_attribute", snake_case(attribute))
}

/// 查询作用域方法名
pub fn scope_name(scope: &str) -> String {
    format!("{}{}", SCOPE_PREFIX, snake_case(scope))
}

/// 管线运行时
///
/// 注册表只在收集处理函数时加读锁，调用处理函数前释放，片段内部可以再次进入运行时。
#[derive(Debug, Clone)]
pub struct PipelineRuntime {
    registry: Arc<RwLock<ExtensionRegistry>>,
}

impl PipelineRuntime {
    /// 在共享注册表上创建运行时
    pub fn new(registry: Arc<RwLock<ExtensionRegistry>>) -> Self {
        Self { registry }
    }

    /// 共享注册表
    pub fn registry(&self) -> &Arc<RwLock<ExtensionRegistry>> {
        &self.registry
    }

    /// 收集实例方法处理函数：注册顺序倒序，仅保留可参与管线的声明
    fn instance_handlers(&self, logical_name: &LogicalName, method: &str) -> Vec<MethodFn> {
        let registry = self.registry.read();
        registry
            .extensions_for(logical_name)
            .iter()
            .rev()
            .filter_map(|fragment| fragment.method(method))
            .filter(|decl| decl.is_chainable())
            .map(|decl| Arc::clone(&decl.handler))
            .collect()
    }

    fn static_handlers(&self, logical_name: &LogicalName, method: &str) -> Vec<StaticFn> {
        let registry = self.registry.read();
        registry
            .static_extensions_for(logical_name)
            .iter()
            .rev()
            .filter_map(|fragment| fragment.static_method(method))
            .filter(|decl| decl.is_chainable())
            .map(|decl| Arc::clone(&decl.handler))
            .collect()
    }

    /// 倒序探测第一个实现了候选方法之一的片段，返回命中的方法名
    fn probe(&self, logical_name: &LogicalName, candidates: &[&str]) -> Option<String> {
        let registry = self.registry.read();
        registry
            .extensions_for(logical_name)
            .iter()
            .rev()
            .find_map(|fragment| {
                candidates
                    .iter()
                    .find(|name| fragment.implements(name))
                    .map(|name| name.to_string())
            })
    }

    fn run(
        &self,
        entity: &mut Entity,
        method: &str,
        args: &[Value],
        base: Option<&BaseFn<'_>>,
    ) -> Result<Value> {
        let logical_name = entity.logical_name().clone();
        let handlers = self.instance_handlers(&logical_name, method);

        if handlers.is_empty() {
            if let Some(base) = base {
                trace!(logical_name = %logical_name, method = %method, "管线为空，调用基础实现");
                return base(entity, args);
            }
            return Err(KernelError::MethodNotInPipeline {
                method: method.to_string(),
                logical_name: logical_name.to_string(),
            });
        }

        trace!(
            logical_name = %logical_name,
            method = %method,
            depth = handlers.len(),
            "分发实例方法"
        );

        let mut next = Next::new(method, &handlers);
        if let Some(base) = base {
            next = next.with_base(base);
        }
        next.call(entity, args)
    }

    /// 分发实例方法
    ///
    /// 最后注册的片段最先执行；它调用 `next.call(..)` 时才会执行更早的片段。
    ///
    /// # Errors
    ///
    /// 没有片段实现该方法时返回 [`KernelError::MethodNotInPipeline`]，调用方应回退到默认行为。
    pub fn dispatch(&self, entity: &mut Entity, method: &str, args: &[Value]) -> Result<Value> {
        self.run(entity, method, args, None)
    }

    /// 分发实例方法，管线为空或耗尽时调用 `base`
    pub fn dispatch_or_else<F>(
        &self,
        entity: &mut Entity,
        method: &str,
        args: &[Value],
        base: F,
    ) -> Result<Value>
    where
        F: Fn(&mut Entity, &[Value]) -> Result<Value> + Send + Sync,
    {
        let base: &BaseFn<'_> = &base;
        self.run(entity, method, args, Some(base))
    }

    /// 是否存在该实例方法的管线，与分发使用相同的筛选规则
    pub fn has_instance_pipeline(&self, logical_name: &LogicalName, method: &str) -> bool {
        self.probe(logical_name, &[method]).is_some()
    }

    /// 读取属性
    ///
    /// 先倒序探测与属性同名的方法或 `get_<attr>_attribute` 读取器，命中则执行该方法的完整管线，
    /// 管线底部返回原始值；均未命中时直接返回原始值，不存在则为 `Null`。
    pub fn get_attribute(&self, entity: &mut Entity, attribute: &str) -> Result<Value> {
        let getter = getter_name(attribute);
        let logical_name = entity.logical_name().clone();

        match self.probe(&logical_name, &[attribute, &getter]) {
            Some(method) => {
                debug!(logical_name = %logical_name, method = %method, "属性读取经过管线");
                let key = attribute.to_string();
                let raw: &BaseFn<'_> = &move |entity: &mut Entity, _: &[Value]| -> Result<Value> {
                    Ok(entity.raw(&key).cloned().unwrap_or(Value::Null))
                };
                self.run(entity, &method, &[], Some(raw))
            }
            None => Ok(entity.raw(attribute).cloned().unwrap_or(Value::Null)),
        }
    }

    /// 写入属性
    ///
    /// 只探测 `set_<attr>_attribute` 写入器，参数为新值；管线底部把值写入原始存储。
    /// 没有写入器时直接写入原始存储。
    pub fn set_attribute(&self, entity: &mut Entity, attribute: &str, value: Value) -> Result<()> {
        let setter = setter_name(attribute);
        let logical_name = entity.logical_name().clone();

        if self.has_instance_pipeline(&logical_name, &setter) {
            debug!(logical_name = %logical_name, method = %setter, "属性写入经过管线");
            let key = attribute.to_string();
            let store: &BaseFn<'_> = &move |entity: &mut Entity, args: &[Value]| -> Result<Value> {
                entity.set_raw(key.clone(), args.first().cloned().unwrap_or(Value::Null));
                Ok(Value::Null)
            };
            self.run(entity, &setter, &[value], Some(store))?;
        } else {
            entity.set_raw(attribute, value);
        }
        Ok(())
    }

    /// 调用查询作用域
    ///
    /// 方法名为 `scope_<name>`，第一个参数是原样传递的查询对象，其后是其余参数。
    pub fn call_scope(
        &self,
        entity: &mut Entity,
        scope: &str,
        query: Value,
        args: &[Value],
    ) -> Result<Value> {
        let method = scope_name(scope);
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(query);
        full.extend_from_slice(args);
        self.run(entity, &method, &full, None)
    }

    /// 是否存在该查询作用域
    pub fn has_scope(&self, logical_name: &LogicalName, scope: &str) -> bool {
        self.has_instance_pipeline(logical_name, &scope_name(scope))
    }

    /// 分发静态方法，无需实体实例
    pub fn call_static(&self, logical_name: &LogicalName, method: &str, args: &[Value]) -> Result<Value> {
        let handlers = self.static_handlers(logical_name, method);
        if handlers.is_empty() {
            return Err(KernelError::MethodNotInPipeline {
                method: method.to_string(),
                logical_name: logical_name.to_string(),
            });
        }
        trace!(logical_name = %logical_name, method = %method, depth = handlers.len(), "分发静态方法");
        StaticNext::new(method, &handlers).call(args)
    }

    /// 是否存在该静态方法的管线
    pub fn has_static_pipeline(&self, logical_name: &LogicalName, method: &str) -> bool {
        let registry = self.registry.read();
        registry
            .static_extensions_for(logical_name)
            .iter()
            .any(|fragment| fragment.implements_static(method))
    }

    /// 以逻辑名在新建实体上分发实例方法
    ///
    /// # Errors
    ///
    /// 逻辑名下没有任何片段时返回 [`KernelError::NoExtensions`]
    pub fn call_by_logical_name(
        &self,
        logical_name: impl Into<LogicalName>,
        method: &str,
        args: &[Value],
    ) -> Result<Value> {
        let logical_name = logical_name.into();
        if !self.registry.read().has_extensions(&logical_name) {
            return Err(KernelError::NoExtensions(logical_name.to_string()));
        }
        let mut entity = Entity::new(logical_name);
        self.dispatch(&mut entity, method, args)
    }
}
