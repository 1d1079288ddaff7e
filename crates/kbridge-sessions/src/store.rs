use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::error::Result;

/// Key-value session storage scoped by external user identity.
///
/// Values are plain JSON so stores stay agnostic of the session layout;
/// [`SessionState`](crate::state::SessionState) owns the typed view.
pub trait SessionStore: Send + Sync {
    /// Return the value stored under `key`, or `None` when unset.
    fn get(&self, identity: &str, key: &str) -> Result<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value.
    fn set(&self, identity: &str, key: &str, value: &Value) -> Result<()>;

    /// Remove `key`. Removing an unset key is not an error.
    fn delete(&self, identity: &str, key: &str) -> Result<()>;

    /// Drop every identity whose most recent write is older than `max_idle`.
    /// Returns the number of identities removed.
    fn purge_idle(&self, max_idle: Duration) -> Result<usize>;

    /// Return the value under `key`, or `default` when unset.
    fn get_or(&self, identity: &str, key: &str, default: Value) -> Result<Value> {
        Ok(self.get(identity, key)?.unwrap_or(default))
    }
}

/// Process-local store backed by a `DashMap`.
///
/// Used in tests and for deployments that accept losing sessions on restart.
#[derive(Default)]
pub struct MemorySessionStore {
    values: DashMap<(String, String), (Value, DateTime<Utc>)>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored key-value pairs across all identities.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, identity: &str, key: &str) -> Result<Option<Value>> {
        Ok(self
            .values
            .get(&(identity.to_string(), key.to_string()))
            .map(|entry| entry.0.clone()))
    }

    fn set(&self, identity: &str, key: &str, value: &Value) -> Result<()> {
        self.values.insert(
            (identity.to_string(), key.to_string()),
            (value.clone(), Utc::now()),
        );
        Ok(())
    }

    fn delete(&self, identity: &str, key: &str) -> Result<()> {
        self.values.remove(&(identity.to_string(), key.to_string()));
        Ok(())
    }

    fn purge_idle(&self, max_idle: Duration) -> Result<usize> {
        let cutoff = cutoff(max_idle);

        let mut last_write: HashMap<String, DateTime<Utc>> = HashMap::new();
        for entry in self.values.iter() {
            let (identity, _) = entry.key();
            let touched = entry.value().1;
            last_write
                .entry(identity.clone())
                .and_modify(|t| *t = (*t).max(touched))
                .or_insert(touched);
        }

        let idle: Vec<String> = last_write
            .into_iter()
            .filter(|(_, touched)| *touched < cutoff)
            .map(|(identity, _)| identity)
            .collect();

        self.values.retain(|(identity, _), _| !idle.contains(identity));
        debug!(purged = idle.len(), "purged idle in-memory sessions");
        Ok(idle.len())
    }
}

pub(crate) fn cutoff(max_idle: Duration) -> DateTime<Utc> {
    let idle = chrono::Duration::from_std(max_idle).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_sub_signed(idle)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
