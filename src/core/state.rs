//! 状态黑板（State Store）
//!
//! 一次运行内所有 Agent 共享的键值映射。值对编排器不透明（JSON），写入即整体覆盖，没有删除与历史版本。
//! 单写者由所有权保证：引擎持有 `&mut StateStore`，Agent 只拿到 `&StateStore`。

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StateStore {
    values: HashMap<String, Value>,
}

impl StateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 用初始输入预置（如 requirement）
    pub fn seeded<K, V>(seed: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self {
            values: seed
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// 以文本形式读取：字符串不带引号，其它 JSON 值序列化，缺失为空串
    pub fn get_text(&self, key: &str) -> String {
        match self.values.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        tracing::debug!(key = %key, "state set");
        self.values.insert(key, value.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// 按键排序的快照，用于报告与比较
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// 只取指定键；keys 为空时返回全部。缺失的键直接省略
    pub fn select(&self, keys: &[String]) -> BTreeMap<String, Value> {
        if keys.is_empty() {
            return self.snapshot();
        }
        keys.iter()
            .filter_map(|k| self.values.get(k).map(|v| (k.clone(), v.clone())))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_overwrites_whole_value() {
        let mut store = StateStore::new();
        store.set("project", json!({"path": "/a", "name": "x"}));
        store.set("project", json!({"path": "/b"}));
        assert_eq!(store.get("project"), Some(&json!({"path": "/b"})));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_get_text_renders_absent_as_empty() {
        let store = StateStore::seeded([("requirement", "todo app")]);
        assert_eq!(store.get_text("requirement"), "todo app");
        assert_eq!(store.get_text("test_results"), "");
    }

    #[test]
    fn test_select_skips_missing_keys() {
        let store = StateStore::seeded([("a", 1), ("b", 2)]);
        let picked = store.select(&["a".to_string(), "missing".to_string()]);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked.get("a"), Some(&json!(1)));
        assert_eq!(store.select(&[]).len(), 2);
    }
}
