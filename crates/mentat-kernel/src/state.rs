//! 共享状态容器
//! Shared state container
//!
//! A keyed map of JSON values behind a reader-writer lock. Every operation
//! holds the lock for its whole duration, so operations are atomic with
//! respect to each other. Hand state to parallel work with
//! [`StateContainer::snapshot`] or a clone, never by sharing the same
//! container.

use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// 线程安全的键值状态容器
/// Thread-safe key/value state container
///
/// `clone` copies the contents into an isolated container. Use
/// [`StateContainer::share`] for a second handle onto the same map.
#[derive(Debug, Default)]
pub struct StateContainer {
    inner: Arc<RwLock<HashMap<String, Value>>>,
}

impl Clone for StateContainer {
    fn clone(&self) -> Self {
        self.fork()
    }
}

impl StateContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_map(map: HashMap<String, Value>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(map)),
        }
    }

    /// 读取键值；缺失时返回 `(Value::Null, false)`
    /// Read a key; absent keys yield `(Value::Null, false)`
    pub fn get(&self, key: &str) -> (Value, bool) {
        match self.inner.read().get(key) {
            Some(v) => (v.clone(), true),
            None => (Value::Null, false),
        }
    }

    /// Read a key as an `Option`.
    pub fn get_opt(&self, key: &str) -> Option<Value> {
        self.inner.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.inner.write().insert(key.into(), value);
    }

    /// 批量更新 (单次加锁)
    /// Apply a batch of writes under a single lock
    pub fn update<I, K>(&self, batch: I)
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        let mut guard = self.inner.write();
        for (k, v) in batch {
            guard.insert(k.into(), v);
        }
    }

    /// Remove a key, returning the previous value.
    pub fn delete(&self, key: &str) -> Option<Value> {
        self.inner.write().remove(key)
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }

    /// Keys in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn size(&self) -> usize {
        self.inner.read().len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.read().contains_key(key)
    }

    /// 返回不相交的副本
    /// Disjoint copy of the current contents
    pub fn snapshot(&self) -> HashMap<String, Value> {
        self.inner.read().clone()
    }

    /// 返回内容相同但相互隔离的新容器
    /// New container with the same contents, isolated from this one
    pub fn fork(&self) -> StateContainer {
        StateContainer::from_map(self.snapshot())
    }

    /// 共享句柄
    /// Second handle onto the same map; writes through either are visible to both
    pub fn share(&self) -> StateContainer {
        StateContainer {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Whether two handles point at the same underlying map.
    pub fn shares_with(&self, other: &StateContainer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
