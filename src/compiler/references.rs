//! 片段源码中的类型引用收集
//!
//! 片段源码是类 Rust 文本。收集前先去掉注释和字符串字面量，
//! 再解析 `use` 导入（含分组与 `as` 别名），最后收集限定路径和经别名导入的裸类型名。

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};

use crate::utils::error::{KernelError, Result};

/// 收集结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct References {
    /// 引用到的完整类型路径
    pub types: BTreeSet<String>,
    /// 导入别名到完整路径的映射
    pub aliases: BTreeMap<String, String>,
}

/// 类型引用收集器
#[derive(Debug, Clone)]
pub struct ReferenceCollector {
    use_stmt: Regex,
    qualified: Regex,
    bare: Regex,
}

impl ReferenceCollector {
    /// 编译正则
    pub fn new() -> Result<Self> {
        let build = |pattern: &str| {
            Regex::new(pattern).map_err(|e| KernelError::Internal(format!("正则编译失败: {}", e)))
        };
        Ok(Self {
            use_stmt: build(r"\buse\s+([^;]+);")?,
            qualified: build(r"(?:^|[^:A-Za-z0-9_])((?:[A-Za-z_][A-Za-z0-9_]*::)+[A-Za-z_][A-Za-z0-9_]*)")?,
            bare: build(r"(?:^|[^:A-Za-z0-9_])([A-Z][A-Za-z0-9_]*)")?,
        })
    }

    /// 收集源码中的类型引用
    ///
    /// # Arguments
    ///
    /// * `source` - 片段源码
    /// * `crate_namespace` - 源码所属模块的命名空间，用于展开 `crate::` 前缀
    pub fn collect(&self, source: &str, crate_namespace: &str) -> References {
        let stripped = strip_comments_and_strings(source);
        let mut refs = References::default();

        for caps in self.use_stmt.captures_iter(&stripped) {
            let mut leaves = Vec::new();
            expand_use_tree("", caps[1].trim(), &mut leaves);
            for (path, alias) in leaves {
                let path = expand_crate(&path, crate_namespace);
                if let Some(alias) = alias {
                    refs.aliases.insert(alias, path);
                }
            }
        }
        for path in refs.aliases.values() {
            if let Some(type_path) = type_prefix(path) {
                refs.types.insert(type_path);
            }
        }

        let body = self.use_stmt.replace_all(&stripped, " ");

        for caps in self.qualified.captures_iter(&body) {
            let raw = &caps[1];
            let mut segments = raw.split("::");
            let first = segments.next().unwrap_or_default();
            let expanded = match refs.aliases.get(first) {
                Some(full) => {
                    let rest: Vec<&str> = segments.collect();
                    if rest.is_empty() {
                        full.clone()
                    } else {
                        format!("{}::{}", full, rest.join("::"))
                    }
                }
                None => expand_crate(raw, crate_namespace),
            };
            if let Some(type_path) = type_prefix(&expanded) {
                refs.types.insert(type_path);
            }
        }

        for caps in self.bare.captures_iter(&body) {
            if let Some(full) = refs.aliases.get(&caps[1]) {
                if let Some(type_path) = type_prefix(full) {
                    refs.types.insert(type_path);
                }
            }
        }

        refs
    }
}

/// 截取到第一个大写开头的段（含该段）；没有大写段时视为函数或模块路径
fn type_prefix(path: &str) -> Option<String> {
    let mut kept = Vec::new();
    for segment in path.split("::") {
        kept.push(segment);
        if segment.chars().next().map(char::is_uppercase).unwrap_or(false) {
            return if kept.len() > 1 { Some(kept.join("::")) } else { None };
        }
    }
    None
}

fn expand_crate(path: &str, crate_namespace: &str) -> String {
    match path.strip_prefix("crate::") {
        Some(rest) if !crate_namespace.is_empty() => format!("{}::{}", crate_namespace, rest),
        _ => path.to_string(),
    }
}

/// 展开 `use` 树，产出 (完整路径, 绑定名)；通配导入没有绑定名
fn expand_use_tree(prefix: &str, tree: &str, out: &mut Vec<(String, Option<String>)>) {
    let tree = tree.trim().trim_start_matches("::");
    if tree.is_empty() {
        return;
    }

    if let Some(open) = tree.find('{') {
        let head = tree[..open].trim().trim_end_matches("::");
        let inner = tree[open + 1..].trim_end().trim_end_matches('}');
        let base = join_path(prefix, head);
        for item in split_top_level(inner) {
            expand_use_tree(&base, item, out);
        }
        return;
    }

    let (path, alias) = match tree.split_once(" as ") {
        Some((path, alias)) => (path.trim(), Some(alias.trim().to_string())),
        None => (tree, None),
    };

    if path == "self" {
        let binding = alias.or_else(|| prefix.rsplit("::").next().map(str::to_string));
        out.push((prefix.to_string(), binding));
        return;
    }
    if path.ends_with('*') {
        out.push((join_path(prefix, path.trim_end_matches("::*").trim_end_matches('*')), None));
        return;
    }

    let full = join_path(prefix, path);
    let binding = alias.or_else(|| full.rsplit("::").next().map(str::to_string));
    out.push((full, binding.filter(|b| b != "_")));
}

fn join_path(prefix: &str, tail: &str) -> String {
    match (prefix.is_empty(), tail.is_empty()) {
        (true, _) => tail.to_string(),
        (_, true) => prefix.to_string(),
        _ => format!("{}::{}", prefix, tail),
    }
}

/// 按顶层逗号拆分分组内容
fn split_top_level(inner: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, c) in inner.char_indices() {
        match c {
            '{' => depth += 1,
            '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                parts.push(inner[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(inner[start..].trim());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

/// 把注释、字符串和字符字面量的内容替换为空格
///
/// 输出与输入逐字节对齐，换行保留，引号保留，因此在输出上找到的偏移可以直接切片原文。
/// 生命周期标注（`'a`）原样保留。
pub fn strip_comments_and_strings(source: &str) -> String {
    let chars: Vec<char> = source.chars().collect();
    let mut out = String::with_capacity(source.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        match c {
            '/' if next == Some('/') => {
                while i < chars.len() && chars[i] != '\n' {
                    blank(&mut out, chars[i]);
                    i += 1;
                }
            }
            '/' if next == Some('*') => {
                out.push_str("  ");
                i += 2;
                while i < chars.len() {
                    if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                        out.push_str("  ");
                        i += 2;
                        break;
                    }
                    blank(&mut out, chars[i]);
                    i += 1;
                }
            }
            '"' => {
                out.push('"');
                i += 1;
                let mut escaped = false;
                while i < chars.len() {
                    let c = chars[i];
                    i += 1;
                    if escaped {
                        escaped = false;
                    } else if c == '\\' {
                        escaped = true;
                    } else if c == '"' {
                        out.push('"');
                        break;
                    }
                    blank(&mut out, c);
                }
            }
            '\'' => match char_literal_len(&chars[i..]) {
                Some(len) => {
                    out.push('\'');
                    for &c in &chars[i + 1..i + len - 1] {
                        blank(&mut out, c);
                    }
                    out.push('\'');
                    i += len;
                }
                None => {
                    out.push('\'');
                    i += 1;
                }
            },
            other => {
                out.push(other);
                i += 1;
            }
        }
    }
    out
}

/// 以 `'` 开头的字符字面量长度（字符数），生命周期返回 `None`
fn char_literal_len(chars: &[char]) -> Option<usize> {
    match chars.get(1)? {
        '\\' => chars
            .iter()
            .skip(3)
            .take(10)
            .position(|&c| c == '\'')
            .map(|p| p + 4),
        '\'' => None,
        _ if chars.get(2) == Some(&'\'') => Some(3),
        _ => None,
    }
}

fn blank(out: &mut String, c: char) {
    if c == '\n' {
        out.push('\n');
    } else {
        out.extend(std::iter::repeat(' ').take(c.len_utf8()));
    }
}
