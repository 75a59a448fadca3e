//! 扩展管线集成测试
//!
//! 模拟多个模块为同一逻辑实体注册片段，验证分发顺序、属性访问器、查询作用域、
//! 静态方法以及模块卸载后的管线

use std::sync::Arc;
use std::thread;

use mosaic_core::pipeline::{ExtensionRegistry, Visibility};
use mosaic_core::{Entity, Fragment, KernelError, LogicalName, PipelineRuntime};
use parking_lot::RwLock;
use serde_json::{json, Value};

// ============================================================================
// 测试辅助
// ============================================================================

fn runtime() -> PipelineRuntime {
    PipelineRuntime::new(Arc::new(RwLock::new(ExtensionRegistry::new())))
}

fn register(runtime: &PipelineRuntime, logical_name: &str, fragment: Fragment) {
    let fragment = Arc::new(fragment);
    let mut registry = runtime.registry().write();
    registry.register(Arc::clone(&fragment), logical_name);
    registry.register_static(fragment, logical_name);
}

/// 在实体的 `trail` 属性末尾追加标记
fn mark(entity: &mut Entity, tag: &str) {
    let mut trail = entity
        .raw("trail")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    trail.push(json!(tag));
    entity.set_raw("trail", Value::Array(trail));
}

fn tracing_fragment(type_path: &str, package: &str, tag: &'static str) -> Fragment {
    Fragment::builder(type_path)
        .package(package)
        .method("save", move |next, entity, args| {
            mark(entity, tag);
            next.call(entity, args)
        })
        .build()
}

// ============================================================================
// 分发顺序
// ============================================================================

/// 最后注册的片段最先执行，委托按注册顺序倒序进行
#[test]
fn test_three_modules_chain_in_reverse_order() {
    let runtime = runtime();
    register(&runtime, "product", tracing_fragment("base::models::Product", "acme/base", "base"));
    register(&runtime, "product", tracing_fragment("stock::models::Product", "acme/stock", "stock"));
    register(&runtime, "product", tracing_fragment("sales::models::Product", "acme/sales", "sales"));

    let mut entity = Entity::new("product");
    let out = runtime
        .dispatch_or_else(&mut entity, "save", &[], |entity, _| {
            mark(entity, "persist");
            Ok(json!(true))
        })
        .unwrap();

    assert_eq!(out, json!(true));
    assert_eq!(
        entity.raw("trail"),
        Some(&json!(["sales", "stock", "base", "persist"]))
    );
}

/// 不委托的片段截断管线
#[test]
fn test_short_circuit_skips_earlier_fragments() {
    let runtime = runtime();
    register(&runtime, "product", tracing_fragment("base::models::Product", "acme/base", "base"));
    register(
        &runtime,
        "product",
        Fragment::builder("guard::models::Product")
            .method("save", |_, _, _| Ok(json!(false)))
            .build(),
    );

    let mut entity = Entity::new("product");
    assert_eq!(runtime.dispatch(&mut entity, "save", &[]).unwrap(), json!(false));
    assert!(entity.raw("trail").is_none());
}

/// 私有方法不参与管线，继承的方法参与
#[test]
fn test_visibility_and_inherited_methods() {
    let runtime = runtime();
    let parent = Fragment::builder("base::models::Named")
        .method("label", |_, entity, _| Ok(json!(format!("#{}", entity.logical_name()))))
        .build();
    register(
        &runtime,
        "product",
        Fragment::builder("stock::models::Product")
            .extends(&parent)
            .method_with("secret", Visibility::Private, |_, _, _| Ok(json!("hidden")))
            .method_with("weight", Visibility::Protected, |_, _, _| Ok(json!(3)))
            .build(),
    );

    let name = LogicalName::new("product");
    let mut entity = Entity::new("product");
    assert_eq!(runtime.dispatch(&mut entity, "label", &[]).unwrap(), json!("#Product"));
    assert_eq!(runtime.dispatch(&mut entity, "weight", &[]).unwrap(), json!(3));
    assert!(!runtime.has_instance_pipeline(&name, "secret"));
    assert!(matches!(
        runtime.dispatch(&mut entity, "secret", &[]),
        Err(KernelError::MethodNotInPipeline { .. })
    ));
}

// ============================================================================
// 属性访问与作用域
// ============================================================================

#[test]
fn test_attribute_accessors_across_modules() {
    let runtime = runtime();
    register(
        &runtime,
        "customer",
        Fragment::builder("crm::models::Customer")
            .method("get_name_attribute", |next, entity, args| {
                let raw = next.call(entity, args)?;
                Ok(json!(raw.as_str().unwrap_or_default().to_uppercase()))
            })
            .method("set_email_attribute", |next, entity, args| {
                let value = args.first().and_then(Value::as_str).unwrap_or_default();
                next.call(entity, &[json!(value.trim().to_lowercase())])
            })
            .build(),
    );
    register(
        &runtime,
        "customer",
        Fragment::builder("loyalty::models::Customer")
            .method("get_name_attribute", |next, entity, args| {
                let name = next.call(entity, args)?;
                Ok(json!(format!("VIP {}", name.as_str().unwrap_or_default())))
            })
            .build(),
    );

    let mut entity = Entity::new("customer");
    entity.set_raw("name", json!("ada"));

    assert_eq!(runtime.get_attribute(&mut entity, "name").unwrap(), json!("VIP ADA"));
    assert_eq!(runtime.get_attribute(&mut entity, "missing").unwrap(), Value::Null);

    runtime
        .set_attribute(&mut entity, "email", json!("  Ada@Example.COM "))
        .unwrap();
    assert_eq!(entity.raw("email"), Some(&json!("ada@example.com")));

    runtime.set_attribute(&mut entity, "phone", json!("123")).unwrap();
    assert_eq!(entity.raw("phone"), Some(&json!("123")));
}

#[test]
fn test_scopes_receive_query_first() {
    let runtime = runtime();
    let add_filter = |field: &'static str| {
        move |next: &mut mosaic_core::Next<'_>, entity: &mut Entity, args: &[Value]| {
            let mut query = args[0].clone();
            if let Some(filters) = query["filters"].as_array_mut() {
                filters.push(json!([field, args.get(1).cloned().unwrap_or(json!(true))]));
            }
            if next.has_next() {
                let mut rest = vec![query];
                rest.extend_from_slice(&args[1..]);
                next.call(entity, &rest)
            } else {
                Ok(query)
            }
        }
    };
    register(
        &runtime,
        "order",
        Fragment::builder("sales::models::Order")
            .method("scope_active", add_filter("active"))
            .build(),
    );
    register(
        &runtime,
        "order",
        Fragment::builder("shop::models::Order")
            .method("scope_active", add_filter("visible"))
            .build(),
    );

    let name = LogicalName::new("order");
    assert!(runtime.has_scope(&name, "active"));
    assert!(!runtime.has_scope(&name, "archived"));

    let mut entity = Entity::new("order");
    let query = runtime
        .call_scope(&mut entity, "active", json!({ "filters": [] }), &[json!(1)])
        .unwrap();
    assert_eq!(query, json!({ "filters": [["visible", 1], ["active", 1]] }));
}

// ============================================================================
// 静态方法与按逻辑名分发
// ============================================================================

#[test]
fn test_static_pipeline() {
    let runtime = runtime();
    register(
        &runtime,
        "invoice",
        Fragment::builder("billing::models::Invoice")
            .static_method("next_number", |_, args| {
                Ok(json!(format!("{}-0001", args[0].as_str().unwrap_or("INV"))))
            })
            .build(),
    );
    register(
        &runtime,
        "invoice",
        Fragment::builder("regional::models::Invoice")
            .static_method("next_number", |next, args| {
                let number = next.call(args)?;
                Ok(json!(format!("EU/{}", number.as_str().unwrap_or_default())))
            })
            .build(),
    );

    let name = LogicalName::new("invoice");
    assert!(runtime.has_static_pipeline(&name, "next_number"));
    assert_eq!(
        runtime.call_static(&name, "next_number", &[json!("INV")]).unwrap(),
        json!("EU/INV-0001")
    );
    assert!(runtime.call_static(&name, "missing", &[]).is_err());
}

#[test]
fn test_call_by_logical_name() {
    let runtime = runtime();
    register(
        &runtime,
        "catalog::product-template",
        Fragment::builder("catalog::models::ProductTemplate")
            .method("kind", |_, entity, _| Ok(json!(entity.logical_name().as_str())))
            .build(),
    );

    let out = runtime
        .call_by_logical_name("catalog/product_template", "kind", &[])
        .unwrap();
    assert_eq!(out, json!("Catalog::ProductTemplate"));
    assert!(matches!(
        runtime.call_by_logical_name("unknown", "kind", &[]),
        Err(KernelError::NoExtensions(_))
    ));
}

// ============================================================================
// 模块卸载与并发
// ============================================================================

#[test]
fn test_unregister_module_keeps_remaining_order() {
    let runtime = runtime();
    register(&runtime, "product", tracing_fragment("a::models::Product", "acme/a", "a"));
    register(&runtime, "product", tracing_fragment("b::models::Product", "acme/b", "b"));
    register(&runtime, "product", tracing_fragment("c::models::Product", "acme/c", "c"));

    let removed = runtime.registry().write().unregister_module("acme/b");
    assert_eq!(removed, 2);

    let mut entity = Entity::new("product");
    runtime
        .dispatch_or_else(&mut entity, "save", &[], |_, _| Ok(Value::Null))
        .unwrap();
    assert_eq!(entity.raw("trail"), Some(&json!(["c", "a"])));
    assert!(runtime.registry().read().find_fragment("b::models::Product").is_none());
}

#[test]
fn test_concurrent_dispatch() {
    let runtime = runtime();
    register(
        &runtime,
        "counter",
        Fragment::builder("a::models::Counter")
            .method("double", |_, _, args| Ok(json!(args[0].as_i64().unwrap_or(0) * 2)))
            .build(),
    );

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let runtime = runtime.clone();
            thread::spawn(move || {
                let mut entity = Entity::new("counter");
                runtime.dispatch(&mut entity, "double", &[json!(i)]).unwrap()
            })
        })
        .collect();

    let results: Vec<Value> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    assert_eq!(results, (0..8).map(|i| json!(i * 2)).collect::<Vec<_>>());
}
