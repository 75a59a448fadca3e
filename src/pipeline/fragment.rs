//! 片段定义
//!
//! 片段是某个模块为一个逻辑实体贡献的一部分行为和声明式属性。
//! 片段的能力（实现了哪些方法、可见性、是否为本片段直接声明）
//! 通过 [`FragmentBuilder`] 显式登记，分发时不做任何运行时反射。

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::pipeline::cursor::{Next, StaticNext};
use crate::pipeline::entity::Entity;
use crate::utils::error::Result;

/// 实例方法处理函数
///
/// 第一个参数是显式传入的后续游标，调用 `next.call(..)` 即委托给下一层片段。
pub type MethodFn = Arc<dyn Fn(&mut Next<'_>, &mut Entity, &[Value]) -> Result<Value> + Send + Sync>;

/// 静态方法处理函数
pub type StaticFn = Arc<dyn Fn(&mut StaticNext<'_>, &[Value]) -> Result<Value> + Send + Sync>;

/// 构造方法名，预编译时排除
pub const CONSTRUCTOR: &str = "new";

/// 方法可见性
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// 公开
    Public,
    /// 受保护，可参与管线
    Protected,
    /// 私有，不参与管线
    Private,
}

impl Visibility {
    /// 能否参与管线链式调用
    pub fn is_chainable(self) -> bool {
        matches!(self, Visibility::Public | Visibility::Protected)
    }
}

/// 方法来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodOrigin {
    /// 由本片段直接声明
    Declared,
    /// 继承自父片段
    Inherited,
}

/// 方法声明
#[derive(Clone)]
pub struct MethodDecl<F> {
    /// 可见性
    pub visibility: Visibility,
    /// 来源
    pub origin: MethodOrigin,
    /// 处理函数
    pub handler: F,
}

impl<F> MethodDecl<F> {
    /// 能否参与运行时管线
    pub fn is_chainable(&self) -> bool {
        self.visibility.is_chainable()
    }

    /// 能否进入预编译产物：本片段直接声明且可参与管线
    pub fn is_compilable(&self) -> bool {
        self.origin == MethodOrigin::Declared && self.is_chainable()
    }
}

impl<F> fmt::Debug for MethodDecl<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDecl")
            .field("visibility", &self.visibility)
            .field("origin", &self.origin)
            .finish_non_exhaustive()
    }
}

/// 片段所属的领域类型，决定生成命名空间和产物目录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DomainType {
    /// 模型
    #[default]
    Models,
    /// 策略
    Policies,
    /// 表单
    Forms,
    /// 服务
    Services,
}

impl DomainType {
    /// 全部领域类型
    pub const ALL: [DomainType; 4] = [
        DomainType::Models,
        DomainType::Policies,
        DomainType::Forms,
        DomainType::Services,
    ];

    /// 命名空间段与目录名
    pub fn as_str(self) -> &'static str {
        match self {
            DomainType::Models => "models",
            DomainType::Policies => "policies",
            DomainType::Forms => "forms",
            DomainType::Services => "services",
        }
    }
}

impl fmt::Display for DomainType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 片段
#[derive(Clone)]
pub struct Fragment {
    type_path: String,
    package: Option<String>,
    domain: DomainType,
    methods: BTreeMap<String, MethodDecl<MethodFn>>,
    static_methods: BTreeMap<String, MethodDecl<StaticFn>>,
    attributes: Map<String, Value>,
    source: Option<PathBuf>,
    is_abstract: bool,
}

impl Fragment {
    /// 创建构建器
    ///
    /// # Arguments
    ///
    /// * `type_path` - 片段类型的完整路径，例如 `acme_sales::models::Product`
    pub fn builder(type_path: impl Into<String>) -> FragmentBuilder {
        FragmentBuilder::new(type_path)
    }

    /// 片段类型路径
    pub fn type_path(&self) -> &str {
        &self.type_path
    }

    /// 声明该片段的模块包名
    pub fn package(&self) -> Option<&str> {
        self.package.as_deref()
    }

    /// 领域类型
    pub fn domain(&self) -> DomainType {
        self.domain
    }

    /// 查询实例方法声明
    pub fn method(&self, name: &str) -> Option<&MethodDecl<MethodFn>> {
        self.methods.get(name)
    }

    /// 全部实例方法声明（按方法名排序）
    pub fn methods(&self) -> impl Iterator<Item = (&str, &MethodDecl<MethodFn>)> {
        self.methods.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// 查询静态方法声明
    pub fn static_method(&self, name: &str) -> Option<&MethodDecl<StaticFn>> {
        self.static_methods.get(name)
    }

    /// 是否以可参与管线的可见性实现了某个实例方法
    pub fn implements(&self, name: &str) -> bool {
        self.methods.get(name).map(|m| m.is_chainable()).unwrap_or(false)
    }

    /// 是否以可参与管线的可见性实现了某个静态方法
    pub fn implements_static(&self, name: &str) -> bool {
        self.static_methods
            .get(name)
            .map(|m| m.is_chainable())
            .unwrap_or(false)
    }

    /// 声明式属性
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }

    /// 源文件路径
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// 是否为抽象片段
    pub fn is_abstract(&self) -> bool {
        self.is_abstract
    }

    /// 标记声明模块，注册时由内核填写
    pub(crate) fn stamp_package(&mut self, package: &str) {
        self.package = Some(package.to_string());
    }
}

impl fmt::Debug for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fragment")
            .field("type_path", &self.type_path)
            .field("package", &self.package)
            .field("domain", &self.domain)
            .field("methods", &self.methods.keys().collect::<Vec<_>>())
            .field("static_methods", &self.static_methods.keys().collect::<Vec<_>>())
            .field("source", &self.source)
            .field("is_abstract", &self.is_abstract)
            .finish()
    }
}

/// 片段构建器
///
/// ```rust
/// use mosaic_core::pipeline::{Fragment, Visibility};
/// use serde_json::json;
///
/// let fragment = Fragment::builder("acme_sales::models::Product")
///     .method("price", |next, entity, args| {
///         let base = next.call(entity, args)?;
///         Ok(json!(base.as_f64().unwrap_or(0.0) * 1.2))
///     })
///     .method_with("recalculate", Visibility::Private, |_, _, _| Ok(json!(null)))
///     .attribute("fillable", json!(["name", "price"]))
///     .build();
///
/// assert!(fragment.implements("price"));
/// assert!(!fragment.implements("recalculate"));
/// ```
pub struct FragmentBuilder {
    fragment: Fragment,
}

impl FragmentBuilder {
    /// 创建构建器
    pub fn new(type_path: impl Into<String>) -> Self {
        Self {
            fragment: Fragment {
                type_path: type_path.into(),
                package: None,
                domain: DomainType::Models,
                methods: BTreeMap::new(),
                static_methods: BTreeMap::new(),
                attributes: Map::new(),
                source: None,
                is_abstract: false,
            },
        }
    }

    /// 继承父片段的方法
    ///
    /// 父片段的全部方法以 `Inherited` 来源复制过来，本片段之后声明的同名方法会覆盖它们。
    pub fn extends(mut self, parent: &Fragment) -> Self {
        for (name, decl) in &parent.methods {
            self.fragment.methods.insert(
                name.clone(),
                MethodDecl {
                    origin: MethodOrigin::Inherited,
                    ..decl.clone()
                },
            );
        }
        for (name, decl) in &parent.static_methods {
            self.fragment.static_methods.insert(
                name.clone(),
                MethodDecl {
                    origin: MethodOrigin::Inherited,
                    ..decl.clone()
                },
            );
        }
        for (key, value) in &parent.attributes {
            self.fragment
                .attributes
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        self
    }

    /// 声明公开实例方法
    pub fn method<F>(self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut Next<'_>, &mut Entity, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.method_with(name, Visibility::Public, handler)
    }

    /// 声明指定可见性的实例方法
    pub fn method_with<F>(mut self, name: impl Into<String>, visibility: Visibility, handler: F) -> Self
    where
        F: Fn(&mut Next<'_>, &mut Entity, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.fragment.methods.insert(
            name.into(),
            MethodDecl {
                visibility,
                origin: MethodOrigin::Declared,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// 声明公开静态方法
    pub fn static_method<F>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&mut StaticNext<'_>, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        self.fragment.static_methods.insert(
            name.into(),
            MethodDecl {
                visibility: Visibility::Public,
                origin: MethodOrigin::Declared,
                handler: Arc::new(handler),
            },
        );
        self
    }

    /// 设置声明式属性
    pub fn attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fragment.attributes.insert(key.into(), value);
        self
    }

    /// 设置领域类型
    pub fn domain(mut self, domain: DomainType) -> Self {
        self.fragment.domain = domain;
        self
    }

    /// 设置源文件路径
    pub fn source(mut self, path: impl Into<PathBuf>) -> Self {
        self.fragment.source = Some(path.into());
        self
    }

    /// 标记为抽象片段
    pub fn abstract_type(mut self) -> Self {
        self.fragment.is_abstract = true;
        self
    }

    /// 预先指定声明模块
    pub fn package(mut self, package: impl Into<String>) -> Self {
        self.fragment.package = Some(package.into());
        self
    }

    /// 构建片段
    pub fn build(self) -> Fragment {
        self.fragment
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder_declarations() {
        let fragment = Fragment::builder("acme::models::Product")
            .method("price", |_, _, _| Ok(json!(1)))
            .method_with("helper", Visibility::Protected, |_, _, _| Ok(json!(2)))
            .method_with("secret", Visibility::Private, |_, _, _| Ok(json!(3)))
            .static_method("defaults", |_, _| Ok(json!({})))
            .attribute("table", json!("products"))
            .domain(DomainType::Models)
            .source("/src/product.rs")
            .build();

        assert!(fragment.implements("price"));
        assert!(fragment.implements("helper"));
        assert!(!fragment.implements("secret"));
        assert!(!fragment.implements("missing"));
        assert!(fragment.implements_static("defaults"));
        assert_eq!(fragment.attributes()["table"], json!("products"));
        assert_eq!(fragment.source(), Some(Path::new("/src/product.rs")));
        assert!(fragment.package().is_none());
    }

    #[test]
    fn test_extends_marks_inherited() {
        let parent = Fragment::builder("acme::models::Base")
            .method("price", |_, _, _| Ok(json!(1)))
            .method("label", |_, _, _| Ok(json!("base")))
            .attribute("table", json!("items"))
            .build();
        let child = Fragment::builder("acme::models::Product")
            .extends(&parent)
            .method("label", |_, _, _| Ok(json!("child")))
            .attribute("table", json!("products"))
            .build();

        let price = child.method("price").unwrap();
        assert_eq!(price.origin, MethodOrigin::Inherited);
        assert!(price.is_chainable());
        assert!(!price.is_compilable());

        let label = child.method("label").unwrap();
        assert_eq!(label.origin, MethodOrigin::Declared);
        assert!(label.is_compilable());
        assert_eq!(child.attributes()["table"], json!("products"));
    }

    #[test]
    fn test_domain_type() {
        assert_eq!(DomainType::Policies.as_str(), "policies");
        assert_eq!(DomainType::default(), DomainType::Models);
        assert_eq!(
            serde_json::to_string(&DomainType::Services).unwrap(),
            "\"services\""
        );
    }
}
