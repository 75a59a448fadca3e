//! API 模块
//!
//! 对外提供的内核入口 [`Kernel`] 与宿主模块接口 [`ModuleEntry`]。

pub mod kernel;

pub use kernel::{Kernel, KernelState, ModuleEntry, RegistrationContext};
