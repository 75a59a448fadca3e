//! 基本使用示例
//!
//! 本示例展示了马赛克内核的基本使用方法，包括：
//!
//! - 在临时目录中准备两个模块清单
//! - 安装模块并引导内核
//! - 通过扩展管线分发方法和读取属性
//! - 预编译并调用生成的管线
//!
//! # 运行示例
//!
//! ```bash
//! cargo run --example basic_usage
//! ```

use mosaic_core::module::InMemoryModuleStateStore;
use mosaic_core::{
    Entity, Fragment, Kernel, KernelConfig, ModuleEntry, RegistrationContext, Result,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;

/// 库存模块：定义基础价格
struct Stock;

#[async_trait::async_trait]
impl ModuleEntry for Stock {
    fn register(&self, ctx: &mut RegistrationContext) -> Result<()> {
        ctx.extend(
            "product",
            Fragment::builder("acme_stock::models::Product")
                .attribute("fillable", json!(["name", "sku"]))
                .method("price", |next, entity, args| {
                    let base = next.call(entity, args)?;
                    Ok(json!(base.as_f64().unwrap_or(100.0)))
                })
                .build(),
        );
        Ok(())
    }
}

/// 销售模块：在库存模块之上打折，并格式化名称
struct Sales;

#[async_trait::async_trait]
impl ModuleEntry for Sales {
    fn register(&self, ctx: &mut RegistrationContext) -> Result<()> {
        ctx.extend(
            "product",
            Fragment::builder("acme_sales::models::Product")
                .attribute("fillable", json!(["discount"]))
                .method("price", |next, entity, args| {
                    let base = next.call(entity, args)?.as_f64().unwrap_or(0.0);
                    let discount = entity.raw("discount").and_then(|d| d.as_f64()).unwrap_or(0.0);
                    Ok(json!(base * (1.0 - discount)))
                })
                .method("get_name_attribute", |next, entity, args| {
                    let raw = next.call(entity, args)?;
                    Ok(json!(format!("[sale] {}", raw.as_str().unwrap_or_default())))
                })
                .build(),
        );
        Ok(())
    }

    async fn boot(&self) -> Result<()> {
        println!("   销售模块已启动");
        Ok(())
    }
}

async fn write_manifest(root: &Path, package: &str, deps: &[&str]) -> std::io::Result<()> {
    let dir = root.join(package);
    tokio::fs::create_dir_all(&dir).await?;
    let mut yaml = format!("package: {package}\nname: {package}\nversion: 1.0.0\n");
    if !deps.is_empty() {
        yaml.push_str("dependencies:\n");
        for dep in deps {
            yaml.push_str(&format!("  - package: {dep}\n"));
        }
    }
    tokio::fs::write(dir.join("module.yaml"), yaml).await
}

/// 主函数
///
/// 演示马赛克内核的基本用法。
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    println!("=== 马赛克内核基本使用示例 ===\n");

    // -------------------------------------------------------------------------
    // 1. 准备模块目录
    // -------------------------------------------------------------------------
    println!("1. 准备模块目录...");
    let workspace = tempfile::tempdir()?;
    let modules = workspace.path().join("modules");
    write_manifest(&modules, "acme/stock", &[]).await?;
    write_manifest(&modules, "acme/sales", &["acme/stock"]).await?;

    let config = KernelConfig::builder()
        .module_dir(&modules)
        .cache_root(workspace.path().join("generated"))
        .build();
    let mut kernel = Kernel::with_state_store(config, Arc::new(InMemoryModuleStateStore::new()))?;
    kernel.register_entry("acme/stock", Arc::new(Stock));
    kernel.register_entry("acme/sales", Arc::new(Sales));
    println!("   ✅ 内核创建成功\n");

    // -------------------------------------------------------------------------
    // 2. 安装并引导
    // -------------------------------------------------------------------------
    println!("2. 安装 acme/sales（连带依赖）并引导...");
    kernel.modules().scan().await?;
    let installed = kernel.install("acme/sales", None).await?;
    println!("   新安装: {:?}", installed);
    let registered = kernel.boot(None).await?;
    println!("   已注册: {:?}\n", registered);

    // -------------------------------------------------------------------------
    // 3. 解释执行
    // -------------------------------------------------------------------------
    println!("3. 通过管线分发...");
    let mut product = Entity::new("product");
    product.set_raw("name", json!("widget"));
    product.set_raw("discount", json!(0.25));

    let price = kernel.runtime().dispatch(&mut product, "price", &[])?;
    let name = kernel.runtime().get_attribute(&mut product, "name")?;
    println!("   price = {}", price);
    println!("   name  = {}\n", name);

    // -------------------------------------------------------------------------
    // 4. 预编译
    // -------------------------------------------------------------------------
    println!("4. 预编译全部逻辑实体...");
    let report = kernel.compile_all(false).await?;
    for (logical_name, path) in &report.compiled {
        println!("   {} -> {}", logical_name, path.display());
    }

    let compiled = kernel.compiled("product").await?;
    let price = compiled.call(&mut product, "price", &[], |_, _| Ok(json!(null)))?;
    println!("   预编译 price = {}", price);
    println!("   合并后的 fillable = {}\n", compiled.attributes()["fillable"]);

    // -------------------------------------------------------------------------
    // 5. 卸载
    // -------------------------------------------------------------------------
    println!("5. 演练卸载 acme/stock...");
    let plan = kernel.uninstall("acme/stock", None, true, true).await?;
    println!("   卸载计划: {:?}", plan);

    kernel.shutdown().await?;
    println!("\n=== 示例完成 ===");
    Ok(())
}
