//! 管线预编译
//!
//! 把一个逻辑名的解释执行管线压平为磁盘上的 JSON 产物：
//! - `attributes` - 声明式属性合并规则
//! - `references` / `isolation` - 类型引用收集与模块隔离检查
//! - `rewrite` - 方法体改写
//! - `artifact` - 产物格式与运行期链接
//! - `compiler` - 编译流程、过期检测与缓存管理

pub mod artifact;
pub mod attributes;
#[allow(clippy::module_inception)]
pub mod compiler;
pub mod isolation;
pub mod paths;
pub mod references;
pub mod rewrite;

pub use artifact::{Artifact, CompiledPipeline, MethodEntry, SourceStamp, ARTIFACT_FORMAT};
pub use attributes::{merge_attributes, MERGEABLE, SINGLETON};
pub use compiler::{CompileOutcome, CompileReport, PipelineCompiler};
pub use isolation::IsolationChecker;
pub use paths::GeneratedPaths;
pub use references::{ReferenceCollector, References};
pub use rewrite::{extract_method, BodyRewriter};
