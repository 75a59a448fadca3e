//! 逻辑名
//!
//! 同一个概念实体（例如 "Product"）的全部片段按逻辑名归组，
//! 与各模块内部的类型命名无关。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// 规范化后的逻辑名
///
/// 规范化规则：
/// 1. 按 `::`、`\`、`/` 拆分为嵌套段
/// 2. 每段先把 `.` 换成 `-`，再把 kebab/snake 写法转为 StudlyCase
/// 3. 各段以 `::` 连接
///
/// ```rust
/// use mosaic_core::pipeline::LogicalName;
///
/// assert_eq!(LogicalName::new("product.template").as_str(), "ProductTemplate");
/// assert_eq!(LogicalName::new("catalog/product_variant").as_str(), "Catalog::ProductVariant");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogicalName(String);

impl LogicalName {
    /// 规范化并创建逻辑名
    pub fn new(raw: impl AsRef<str>) -> Self {
        let segments: Vec<String> = raw
            .as_ref()
            .split(|c: char| c == '/' || c == '\\')
            .flat_map(|part| part.split("::"))
            .map(studly_segment)
            .filter(|s| !s.is_empty())
            .collect();
        Self(segments.join("::"))
    }

    /// 规范形式
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// 嵌套段
    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split("::")
    }

    /// 最后一段，即生成类型的短名
    pub fn short_name(&self) -> &str {
        self.0.rsplit("::").next().unwrap_or(&self.0)
    }

    /// 相对路径，例如 `Catalog/ProductVariant`
    pub fn relative_path(&self) -> PathBuf {
        self.segments().collect()
    }
}

impl fmt::Display for LogicalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for LogicalName {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for LogicalName {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl AsRef<str> for LogicalName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

fn studly_segment(segment: &str) -> String {
    segment
        .replace('.', "-")
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}

/// 驼峰或 Studly 写法转 snake_case，用于推导约定方法名
pub(crate) fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c == '-' || c == ' ' || c == '.' {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            prev_lower = false;
        } else if c.is_uppercase() {
            if prev_lower && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}
