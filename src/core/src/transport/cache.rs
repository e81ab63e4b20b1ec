use std::collections::HashMap;
use std::sync::Mutex;

use parlor_protocol::Operation;
use serde::Serialize;
use serde_json::Value;

/// Last known result per (operation, variables), for cache-then-network
/// reads. Holds raw `data` values; decoding happens on read.
#[derive(Debug, Default)]
pub struct QueryCache {
    entries: Mutex<HashMap<String, Value>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read<O: Operation>(&self, op: &O) -> Option<O::Data> {
        let key = cache_key(O::NAME, op.variables().as_ref());
        let value = self.lock().get(&key).cloned()?;
        match serde_json::from_value(value) {
            Ok(data) => Some(data),
            Err(e) => {
                tracing::warn!(operation = O::NAME, error = %e, "dropping undecodable cache entry");
                self.lock().remove(&key);
                None
            }
        }
    }

    pub fn write<O: Operation>(&self, op: &O, data: &O::Data)
    where
        O::Data: Serialize,
    {
        match serde_json::to_value(data) {
            Ok(value) => self.write_value(O::NAME, op.variables().as_ref(), value),
            Err(e) => tracing::warn!(operation = O::NAME, error = %e, "cache write skipped"),
        }
    }

    pub(crate) fn write_value(&self, name: &str, variables: Option<&Value>, value: Value) {
        self.lock().insert(cache_key(name, variables), value);
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Value>> {
        match self.entries.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

fn cache_key(name: &str, variables: Option<&Value>) -> String {
    match variables {
        Some(v) => format!("{name}:{v}"),
        None => name.to_string(),
    }
}
