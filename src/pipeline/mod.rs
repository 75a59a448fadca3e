//! 跨模块扩展管线
//!
//! 多个模块为同一逻辑实体注册片段，分发时按注册顺序倒序串成一条管线：
//! - 片段能力通过 [`FragmentBuilder`] 显式声明
//! - 处理函数通过显式传入的 [`Next`] 委托给上一层
//! - [`PipelineRuntime`] 负责解释执行，预编译模式见 [`crate::compiler`]

pub mod cursor;
pub mod entity;
pub mod fragment;
pub mod logical_name;
pub mod registry;
pub mod runtime;

pub use cursor::{BaseFn, Next, StaticNext};
pub use entity::Entity;
pub use fragment::{
    DomainType, Fragment, FragmentBuilder, MethodDecl, MethodFn, MethodOrigin, StaticFn,
    Visibility, CONSTRUCTOR,
};
pub use logical_name::LogicalName;
pub use registry::ExtensionRegistry;
pub use runtime::{getter_name, scope_name, setter_name, PipelineRuntime};
