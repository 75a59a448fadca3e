//! 实体实例

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::pipeline::logical_name::LogicalName;

/// 逻辑实体的一个实例
///
/// 只保存逻辑名和原始属性，行为全部来自管线中的片段。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    logical_name: LogicalName,
    #[serde(default)]
    attributes: Map<String, Value>,
}

impl Entity {
    /// 创建空实例
    pub fn new(logical_name: impl Into<LogicalName>) -> Self {
        Self {
            logical_name: logical_name.into(),
            attributes: Map::new(),
        }
    }

    /// 以初始属性创建实例
    pub fn with_attributes(logical_name: impl Into<LogicalName>, attributes: Map<String, Value>) -> Self {
        Self {
            logical_name: logical_name.into(),
            attributes,
        }
    }

    /// 逻辑名
    pub fn logical_name(&self) -> &LogicalName {
        &self.logical_name
    }

    /// 读取原始属性，不经过管线
    pub fn raw(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// 写入原始属性，不经过管线
    pub fn set_raw(&mut self, key: impl Into<String>, value: Value) {
        self.attributes.insert(key.into(), value);
    }

    /// 删除原始属性
    pub fn remove_raw(&mut self, key: &str) -> Option<Value> {
        self.attributes.remove(key)
    }

    /// 全部原始属性
    pub fn attributes(&self) -> &Map<String, Value> {
        &self.attributes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_raw_attributes() {
        let mut entity = Entity::new("product");
        assert_eq!(entity.logical_name().as_str(), "Product");
        assert!(entity.raw("price").is_none());

        entity.set_raw("price", json!(10));
        assert_eq!(entity.raw("price"), Some(&json!(10)));
        assert_eq!(entity.remove_raw("price"), Some(json!(10)));
        assert!(entity.attributes().is_empty());
    }
}
