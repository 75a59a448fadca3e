//! 声明式属性合并
//!
//! 规则：
//! - 可合并属性：列表拼接去重，映射递归合并（后注册者优先）
//! - 单值属性：所有片段必须一致，否则编译失败
//! - 其他属性：后注册者覆盖

use serde_json::{Map, Value};

use crate::pipeline::LogicalName;
use crate::utils::error::{KernelError, Result};

/// 可合并属性
pub const MERGEABLE: &[&str] = &[
    "fillable",
    "guarded",
    "casts",
    "hidden",
    "appends",
    "with",
    "with_count",
    "touches",
];

/// 单值属性
pub const SINGLETON: &[&str] = &[
    "table",
    "connection",
    "primary_key",
    "key_type",
    "incrementing",
    "timestamps",
];

/// 按注册顺序合并各片段的声明式属性
///
/// # Arguments
///
/// * `logical_name` - 逻辑名，用于错误信息
/// * `sources` - 各片段的属性，按注册顺序
///
/// # Errors
///
/// - 单值属性取值不一致时返回 [`KernelError::AttributeConflict`]
/// - 可合并属性既不是列表也不是映射时返回 [`KernelError::InvalidAttribute`]
pub fn merge_attributes<'a, I>(logical_name: &LogicalName, sources: I) -> Result<Map<String, Value>>
where
    I: IntoIterator<Item = &'a Map<String, Value>>,
{
    let mut merged = Map::new();

    for attributes in sources {
        for (key, value) in attributes {
            if MERGEABLE.contains(&key.as_str()) {
                let incoming = Collection::from_value(value).ok_or_else(|| {
                    KernelError::InvalidAttribute {
                        logical_name: logical_name.to_string(),
                        attribute: key.clone(),
                        reason: "必须是列表或映射".to_string(),
                    }
                })?;
                let combined = match merged.remove(key) {
                    None => incoming.into_value(),
                    Some(existing) => merge_collection(logical_name, key, existing, incoming)?,
                };
                merged.insert(key.clone(), combined);
            } else if SINGLETON.contains(&key.as_str()) {
                match merged.get(key) {
                    Some(existing) if existing != value => {
                        return Err(KernelError::AttributeConflict {
                            logical_name: logical_name.to_string(),
                            attribute: key.clone(),
                            existing: existing.to_string(),
                            incoming: value.to_string(),
                        });
                    }
                    Some(_) => {}
                    None => {
                        merged.insert(key.clone(), value.clone());
                    }
                }
            } else {
                merged.insert(key.clone(), value.clone());
            }
        }
    }

    Ok(merged)
}

/// 可合并属性的两种形态
enum Collection {
    List(Vec<Value>),
    Map(Map<String, Value>),
}

impl Collection {
    /// 数组，或键恰为 `0..n-1` 的对象，视为列表
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(Collection::List(items.clone())),
            Value::Object(map) if is_sequential(map) => {
                let mut items: Vec<(usize, &Value)> = map
                    .iter()
                    .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v)))
                    .collect();
                items.sort_by_key(|(i, _)| *i);
                Some(Collection::List(items.into_iter().map(|(_, v)| v.clone()).collect()))
            }
            Value::Object(map) => Some(Collection::Map(map.clone())),
            _ => None,
        }
    }

    fn into_value(self) -> Value {
        match self {
            Collection::List(items) => Value::Array(dedup(items)),
            Collection::Map(map) => Value::Object(map),
        }
    }
}

fn is_sequential(map: &Map<String, Value>) -> bool {
    !map.is_empty() && (0..map.len()).all(|i| map.contains_key(&i.to_string()))
}

fn dedup(items: Vec<Value>) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        if !out.contains(&item) {
            out.push(item);
        }
    }
    out
}

fn merge_collection(
    logical_name: &LogicalName,
    key: &str,
    existing: Value,
    incoming: Collection,
) -> Result<Value> {
    let existing = Collection::from_value(&existing);
    match (existing, incoming) {
        (Some(Collection::List(mut left)), Collection::List(right)) => {
            left.extend(right);
            Ok(Value::Array(dedup(left)))
        }
        (Some(Collection::Map(mut left)), Collection::Map(right)) => {
            merge_maps(&mut left, right);
            Ok(Value::Object(left))
        }
        _ => Err(KernelError::InvalidAttribute {
            logical_name: logical_name.to_string(),
            attribute: key.to_string(),
            reason: "列表与映射不能合并".to_string(),
        }),
    }
}

fn merge_maps(target: &mut Map<String, Value>, incoming: Map<String, Value>) {
    for (key, value) in incoming {
        match value {
            Value::Object(nested) => match target.get_mut(&key) {
                Some(Value::Object(existing)) => merge_maps(existing, nested),
                _ => {
                    target.insert(key, Value::Object(nested));
                }
            },
            value => {
                target.insert(key, value);
            }
        }
    }
}
