//! 方法体改写
//!
//! 产物中的方法体来自片段源码，写入前做两类改写：
//! 委托标记 `self.next(` 改为游标调用 `next.call(`；
//! 指向同一逻辑名分组内其他片段的类型引用改为生成类型路径。

use regex::{Captures, Regex};
use std::collections::BTreeMap;

use crate::compiler::references::strip_comments_and_strings;
use crate::utils::error::{KernelError, Result};

/// 游标调用原语
pub const CALL_NEXT: &str = "next.call(";

/// 方法体改写器
#[derive(Debug, Clone)]
pub struct BodyRewriter {
    delegate: Regex,
}

impl BodyRewriter {
    /// 编译正则
    pub fn new() -> Result<Self> {
        let delegate = Regex::new(r"\bself\s*\.\s*next\s*\(")
            .map_err(|e| KernelError::Internal(format!("正则编译失败: {}", e)))?;
        Ok(Self { delegate })
    }

    /// 改写委托标记
    pub fn rewrite_delegate(&self, body: &str) -> String {
        self.delegate.replace_all(body, CALL_NEXT).into_owned()
    }

    /// 把分组内的片段类型（完整路径或导入别名）改写为生成类型路径
    ///
    /// # Arguments
    ///
    /// * `body` - 方法体
    /// * `targets` - 待改写的名称到生成类型路径的映射
    pub fn rewrite_types(&self, body: &str, targets: &BTreeMap<String, String>) -> Result<String> {
        if targets.is_empty() {
            return Ok(body.to_string());
        }

        // 长名优先，避免短别名截断完整路径
        let mut names: Vec<&String> = targets.keys().collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = names
            .iter()
            .map(|n| regex::escape(n))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = Regex::new(&format!(
            r"(^|[^:A-Za-z0-9_])({})($|[^A-Za-z0-9_])",
            alternation
        ))
        .map_err(|e| KernelError::Internal(format!("正则编译失败: {}", e)))?;

        // 相邻匹配共享边界字符，循环直到稳定
        let mut current = body.to_string();
        loop {
            let next = pattern
                .replace_all(&current, |caps: &Captures<'_>| {
                    let replacement = targets
                        .get(&caps[2])
                        .map(String::as_str)
                        .unwrap_or(&caps[2]);
                    format!("{}{}{}", &caps[1], replacement, &caps[3])
                })
                .into_owned();
            if next == current {
                return Ok(next);
            }
            current = next;
        }
    }

    /// 两类改写依次执行
    pub fn rewrite(&self, body: &str, targets: &BTreeMap<String, String>) -> Result<String> {
        self.rewrite_types(&self.rewrite_delegate(body), targets)
    }
}

/// 从源码中按括号匹配提取方法定义
///
/// 返回从 `fn` 关键字到配对右花括号的完整文本；找不到时返回 `None`。
/// 注释、字符串和字符字面量中的花括号不参与匹配。
pub fn extract_method(source: &str, name: &str) -> Option<String> {
    let pattern = Regex::new(&format!(r"\bfn\s+{}\s*[(<]", regex::escape(name))).ok()?;
    let masked = strip_comments_and_strings(source);
    let found = pattern.find(&masked)?;
    let open = found.end() + masked[found.end()..].find('{')?;

    let mut depth = 0usize;
    for (offset, byte) in masked.bytes().enumerate().skip(open) {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(source[found.start()..=offset].to_string());
                }
            }
            _ => {}
        }
    }
    None
}
