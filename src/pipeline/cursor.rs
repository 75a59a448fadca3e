//! 管线游标
//!
//! 游标作为显式参数传给每个处理函数，处理函数调用 [`Next::call`] 即委托给下一层。
//! 游标只活在一次分发调用的栈上，并发分发之间互不可见。

use serde_json::Value;

use crate::pipeline::entity::Entity;
use crate::pipeline::fragment::{MethodFn, StaticFn};
use crate::utils::error::Result;

/// 管线耗尽时的物理基础实现
pub type BaseFn<'a> = dyn Fn(&mut Entity, &[Value]) -> Result<Value> + Send + Sync + 'a;

/// 实例方法游标
pub struct Next<'a> {
    method: &'a str,
    handlers: &'a [MethodFn],
    index: usize,
    base: Option<&'a BaseFn<'a>>,
}

impl<'a> Next<'a> {
    /// 在处理函数列表上创建游标，索引从 0 开始
    pub fn new(method: &'a str, handlers: &'a [MethodFn]) -> Self {
        Self {
            method,
            handlers,
            index: 0,
            base: None,
        }
    }

    /// 设置管线耗尽后的基础实现
    pub fn with_base(mut self, base: &'a BaseFn<'a>) -> Self {
        self.base = Some(base);
        self
    }

    /// 当前方法名
    pub fn method(&self) -> &str {
        self.method
    }

    /// 是否还有下一层处理函数
    pub fn has_next(&self) -> bool {
        self.index < self.handlers.len()
    }

    /// 剩余层数
    pub fn remaining(&self) -> usize {
        self.handlers.len().saturating_sub(self.index)
    }

    /// 调用下一层
    ///
    /// 索引先前移再调用，处理函数内部再次调用 `call` 即从再下一层继续。
    /// 管线耗尽时调用基础实现；没有基础实现则返回 `Value::Null`。
    pub fn call(&mut self, entity: &mut Entity, args: &[Value]) -> Result<Value> {
        let handlers = self.handlers;
        match handlers.get(self.index) {
            Some(handler) => {
                self.index += 1;
                handler(self, entity, args)
            }
            None => match self.base {
                Some(base) => base(entity, args),
                None => Ok(Value::Null),
            },
        }
    }

    /// 调用下一层，管线耗尽时返回 `None`
    pub fn call_or_none(&mut self, entity: &mut Entity, args: &[Value]) -> Result<Option<Value>> {
        if !self.has_next() && self.base.is_none() {
            return Ok(None);
        }
        self.call(entity, args).map(Some)
    }
}

/// 静态方法游标
pub struct StaticNext<'a> {
    method: &'a str,
    handlers: &'a [StaticFn],
    index: usize,
}

impl<'a> StaticNext<'a> {
    /// 创建游标
    pub fn new(method: &'a str, handlers: &'a [StaticFn]) -> Self {
        Self {
            method,
            handlers,
            index: 0,
        }
    }

    /// 当前方法名
    pub fn method(&self) -> &str {
        self.method
    }

    /// 是否还有下一层
    pub fn has_next(&self) -> bool {
        self.index < self.handlers.len()
    }

    /// 调用下一层，耗尽时返回 `Value::Null`
    pub fn call(&mut self, args: &[Value]) -> Result<Value> {
        let handlers = self.handlers;
        match handlers.get(self.index) {
            Some(handler) => {
                self.index += 1;
                handler(self, args)
            }
            None => Ok(Value::Null),
        }
    }
}
