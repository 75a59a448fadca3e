//! 模块管理
//!
//! - `metadata` / `parser` - 模块清单与元数据
//! - `dependency` - 依赖图、拓扑排序与卸载计划
//! - `registry` - 模块发现与注册
//! - `state` - 按租户持久化的安装状态
//! - `lifecycle` - 安装、启用、停用、升级与卸载

pub mod dependency;
pub mod lifecycle;
pub mod metadata;
pub mod parser;
pub mod registry;
pub mod state;

pub use dependency::{
    check_version_requirements, DependencyGraph, Resolver, ReverseGraph, UninstallResolver,
};
pub use lifecycle::ModuleLifecycleManager;
pub use metadata::{derive_slug, Dependency, ModuleInfo, ModuleMetadata};
pub use parser::{ModuleParser, MANIFEST_FILE};
pub use registry::ModuleRegistry;
pub use state::{InMemoryModuleStateStore, JsonModuleStateStore, ModuleState, ModuleStateStore};
