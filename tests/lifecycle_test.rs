//! 模块生命周期端到端测试
//!
//! 从磁盘上的模块清单出发：扫描 → 安装 → 引导 → 分发 → 卸载，
//! 以及状态文件持久化、租户隔离和依赖错误场景

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use mosaic_core::module::{InMemoryModuleStateStore, JsonModuleStateStore, ModuleStateStore};
use mosaic_core::{
    Entity, Fragment, Kernel, KernelConfig, KernelError, ModuleEntry, RegistrationContext, Result,
};
use serde_json::json;
use tempfile::TempDir;

// ============================================================================
// 测试辅助
// ============================================================================

/// 为 `order` 追加一层 `total` 的模块入口
struct OrderExtension {
    package: &'static str,
    surcharge: i64,
    destroyed: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl ModuleEntry for OrderExtension {
    fn register(&self, ctx: &mut RegistrationContext) -> Result<()> {
        let surcharge = self.surcharge;
        let type_path = format!("{}::models::Order", self.package.replace('/', "_"));
        ctx.extend(
            "order",
            Fragment::builder(type_path)
                .method("total", move |next, entity, args| {
                    let base = next.call(entity, args)?.as_i64().unwrap_or(0);
                    Ok(json!(base + surcharge))
                })
                .build(),
        );
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

async fn write_manifest(root: &Path, package: &str, version: &str, deps: &[(&str, &str)]) {
    let dir = root.join(package);
    tokio::fs::create_dir_all(&dir).await.unwrap();
    let mut yaml = format!("package: {package}\nname: {package}\nversion: \"{version}\"\n");
    if !deps.is_empty() {
        yaml.push_str("dependencies:\n");
        for (dep, req) in deps {
            yaml.push_str(&format!("  - package: {dep}\n    version: \"{req}\"\n"));
        }
    }
    tokio::fs::write(dir.join("module.yaml"), yaml).await.unwrap();
}

/// base <- stock <- sales，shipping 依赖 base
async fn write_modules(root: &Path) {
    write_manifest(root, "acme/base", "1.2.0", &[]).await;
    write_manifest(root, "acme/stock", "1.0.0", &[("acme/base", "^1.0")]).await;
    write_manifest(root, "acme/sales", "2.0.0", &[("acme/stock", "^1.0")]).await;
    write_manifest(root, "acme/shipping", "1.0.0", &[("acme/base", "^1.1")]).await;
}

fn config(temp: &TempDir) -> KernelConfig {
    KernelConfig::builder()
        .module_dir(temp.path().join("modules"))
        .state_file(temp.path().join("state.json"))
        .cache_root(temp.path().join("generated"))
        .build()
}

fn register_entries(kernel: &mut Kernel, destroyed: &Arc<AtomicUsize>) {
    for (package, surcharge) in [
        ("acme/base", 100),
        ("acme/stock", 10),
        ("acme/sales", 1),
        ("acme/shipping", 5),
    ] {
        kernel.register_entry(
            package,
            Arc::new(OrderExtension {
                package,
                surcharge,
                destroyed: Arc::clone(destroyed),
            }),
        );
    }
}

// ============================================================================
// 端到端流程
// ============================================================================

#[tokio::test]
async fn test_full_lifecycle_with_persistent_state() {
    let temp = TempDir::new().unwrap();
    write_modules(&temp.path().join("modules")).await;
    let destroyed = Arc::new(AtomicUsize::new(0));

    // 第一次运行：安装 sales（连带 stock、base）
    {
        let kernel = Kernel::new(config(&temp)).await.unwrap();
        kernel.modules().scan().await.unwrap();
        let installed = kernel.install("acme/sales", None).await.unwrap();
        assert_eq!(installed, vec!["acme/base", "acme/stock", "acme/sales"]);
    }

    // 第二次运行：状态来自磁盘
    let mut kernel = Kernel::new(config(&temp)).await.unwrap();
    register_entries(&mut kernel, &destroyed);
    let registered = kernel.boot(None).await.unwrap();
    assert_eq!(registered, vec!["acme/base", "acme/stock", "acme/sales"]);

    let total = kernel
        .runtime()
        .call_by_logical_name("order", "total", &[])
        .unwrap();
    assert_eq!(total, json!(111));

    // shipping 未安装，其片段不在管线中
    assert!(kernel
        .extensions()
        .read()
        .fragments_of_module("acme/shipping")
        .is_empty());

    // 级联卸载 stock：sales 先于 stock
    let plan = kernel.uninstall("acme/stock", None, true, false).await.unwrap();
    assert_eq!(plan, vec!["acme/sales", "acme/stock"]);

    let mut entity = Entity::new("order");
    assert_eq!(
        kernel.runtime().dispatch(&mut entity, "total", &[]).unwrap(),
        json!(100)
    );

    kernel.shutdown().await.unwrap();
    assert_eq!(destroyed.load(Ordering::SeqCst), 3);

    let store = JsonModuleStateStore::open(temp.path().join("state.json"))
        .await
        .unwrap();
    let remaining = store.all(None).await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining.contains_key("acme/base"));
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let temp = TempDir::new().unwrap();
    write_modules(&temp.path().join("modules")).await;

    let kernel = Kernel::with_state_store(config(&temp), Arc::new(InMemoryModuleStateStore::new()))
        .unwrap();
    kernel.modules().scan().await.unwrap();

    kernel.install("acme/shipping", Some("shop1")).await.unwrap();
    kernel.install("acme/stock", Some("shop2")).await.unwrap();

    let shop1 = kernel.modules().installed(Some("shop1")).await.unwrap();
    let shop2 = kernel.modules().installed(Some("shop2")).await.unwrap();
    assert!(shop1.contains_key("acme/shipping"));
    assert!(!shop1.contains_key("acme/stock"));
    assert!(shop2.contains_key("acme/stock"));
    assert!(kernel.modules().installed(None).await.unwrap().is_empty());

    assert!(matches!(
        kernel.disable("acme/shipping", Some("shop2")).await,
        Err(KernelError::ModuleNotInstalled { .. })
    ));
}

#[tokio::test]
async fn test_boot_per_tenant() {
    let temp = TempDir::new().unwrap();
    write_modules(&temp.path().join("modules")).await;
    let destroyed = Arc::new(AtomicUsize::new(0));

    let mut kernel = Kernel::with_state_store(config(&temp), Arc::new(InMemoryModuleStateStore::new()))
        .unwrap();
    register_entries(&mut kernel, &destroyed);
    kernel.modules().scan().await.unwrap();
    kernel.install("acme/shipping", Some("shop1")).await.unwrap();
    kernel.install("acme/sales", None).await.unwrap();

    let registered = kernel.boot(Some("shop1")).await.unwrap();
    assert_eq!(registered, vec!["acme/base", "acme/shipping"]);
    let total = kernel
        .runtime()
        .call_by_logical_name("order", "total", &[])
        .unwrap();
    assert_eq!(total, json!(105));
}

// ============================================================================
// 错误场景
// ============================================================================

#[tokio::test]
async fn test_uninstall_blocked_by_dependents() {
    let temp = TempDir::new().unwrap();
    write_modules(&temp.path().join("modules")).await;

    let kernel = Kernel::with_state_store(config(&temp), Arc::new(InMemoryModuleStateStore::new()))
        .unwrap();
    kernel.modules().scan().await.unwrap();
    kernel.install("acme/sales", None).await.unwrap();
    kernel.install("acme/shipping", None).await.unwrap();

    match kernel.uninstall("acme/base", None, false, false).await {
        Err(KernelError::BlockedByDependents { module, dependents }) => {
            assert_eq!(module, "acme/base");
            assert_eq!(dependents, vec!["acme/shipping", "acme/stock"]);
        }
        other => panic!("unexpected result: {other:?}"),
    }

    let plan = kernel.uninstall("acme/base", None, true, true).await.unwrap();
    assert_eq!(plan.last().map(String::as_str), Some("acme/base"));
    assert_eq!(plan.len(), 4);
    let sales = plan.iter().position(|p| p == "acme/sales").unwrap();
    let stock = plan.iter().position(|p| p == "acme/stock").unwrap();
    assert!(sales < stock);

    // 演练不改变状态
    assert_eq!(kernel.modules().installed(None).await.unwrap().len(), 4);
    assert!(matches!(
        kernel.uninstall("acme/unknown", None, false, false).await,
        Err(KernelError::ModuleNotInstalled { .. })
    ));
}

#[tokio::test]
async fn test_dependency_errors() {
    let temp = TempDir::new().unwrap();
    let modules = temp.path().join("modules");
    write_manifest(&modules, "acme/base", "0.9.0", &[]).await;
    write_manifest(&modules, "acme/stock", "1.0.0", &[("acme/base", "^1.0")]).await;
    write_manifest(&modules, "acme/orphan", "1.0.0", &[("acme/missing", "*")]).await;
    write_manifest(&modules, "acme/ping", "1.0.0", &[("acme/pong", "*")]).await;
    write_manifest(&modules, "acme/pong", "1.0.0", &[("acme/ping", "*")]).await;

    let kernel = Kernel::with_state_store(config(&temp), Arc::new(InMemoryModuleStateStore::new()))
        .unwrap();
    kernel.modules().scan().await.unwrap();

    assert!(matches!(
        kernel.install("acme/stock", None).await,
        Err(KernelError::VersionMismatch { .. })
    ));
    assert!(matches!(
        kernel.install("acme/orphan", None).await,
        Err(KernelError::DependencyNotFound(ref p)) if p == "acme/missing"
    ));
    assert!(matches!(
        kernel.install("acme/ping", None).await,
        Err(KernelError::CircularDependency(_))
    ));
    assert!(matches!(
        kernel.install("acme/nowhere", None).await,
        Err(KernelError::ModuleNotFound(_))
    ));

    // 失败的安装不留下任何状态
    assert!(kernel.modules().installed(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upgrade_and_orphan_cleanup() {
    let temp = TempDir::new().unwrap();
    let modules = temp.path().join("modules");
    write_modules(&modules).await;

    let store: Arc<dyn ModuleStateStore> = Arc::new(InMemoryModuleStateStore::new());
    store.install("acme/base", "1.0.0", None).await.unwrap();
    store.install("acme/retired", "0.1.0", None).await.unwrap();

    let kernel = Kernel::with_state_store(config(&temp), Arc::clone(&store)).unwrap();
    kernel.boot(None).await.unwrap();

    // 引导时清理磁盘上已不存在的模块
    assert!(store.get("acme/retired", None).await.unwrap().is_none());

    let state = kernel.upgrade("acme/base", None).await.unwrap();
    assert_eq!(state.version, "1.2.0");
}
