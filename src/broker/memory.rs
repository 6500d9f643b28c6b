//! In-process [`Broker`] implementation.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use futures_util::future::{BoxFuture, ready};

use super::Broker;
use crate::error::ServerError;

#[derive(Debug, Default)]
struct Keyspace {
    lists: HashMap<String, VecDeque<String>>,
    strings: HashMap<String, String>,
}

/// Broker keeping lists and strings in process memory.
///
/// Every operation completes immediately; the futures never suspend.
#[derive(Debug, Default)]
pub struct MemoryBroker {
    keyspace: Mutex<Keyspace>,
}

impl MemoryBroker {
    /// Creates an empty broker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn keyspace(&self) -> MutexGuard<'_, Keyspace> {
        self.keyspace.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Broker for MemoryBroker {
    fn list_push(&self, key: &str, value: String) -> BoxFuture<'_, Result<usize, ServerError>> {
        let mut keyspace = self.keyspace();
        let list = keyspace.lists.entry(key.to_string()).or_default();
        list.push_back(value);
        ready(Ok(list.len())).boxed()
    }

    fn list_pop(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, ServerError>> {
        let mut keyspace = self.keyspace();
        let item = keyspace.lists.get_mut(key).and_then(VecDeque::pop_front);
        if keyspace.lists.get(key).is_some_and(VecDeque::is_empty) {
            keyspace.lists.remove(key);
        }
        ready(Ok(item)).boxed()
    }

    fn list_len(&self, key: &str) -> BoxFuture<'_, Result<usize, ServerError>> {
        let len = self.keyspace().lists.get(key).map_or(0, VecDeque::len);
        ready(Ok(len)).boxed()
    }

    fn list_position(
        &self,
        key: &str,
        value: &str,
    ) -> BoxFuture<'_, Result<Option<usize>, ServerError>> {
        let position = self
            .keyspace()
            .lists
            .get(key)
            .and_then(|list| list.iter().position(|item| item == value));
        ready(Ok(position)).boxed()
    }

    fn list_remove(&self, key: &str, value: &str) -> BoxFuture<'_, Result<usize, ServerError>> {
        let mut keyspace = self.keyspace();
        let removed = keyspace.lists.get_mut(key).map_or(0, |list| {
            let before = list.len();
            list.retain(|item| item != value);
            before - list.len()
        });
        if keyspace.lists.get(key).is_some_and(VecDeque::is_empty) {
            keyspace.lists.remove(key);
        }
        ready(Ok(removed)).boxed()
    }

    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<String>, ServerError>> {
        let value = self.keyspace().strings.get(key).cloned();
        ready(Ok(value)).boxed()
    }

    fn set(&self, key: &str, value: String) -> BoxFuture<'_, Result<(), ServerError>> {
        self.keyspace().strings.insert(key.to_string(), value);
        ready(Ok(())).boxed()
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, ServerError>> {
        let mut keyspace = self.keyspace();
        let list = keyspace.lists.remove(key).is_some();
        let string = keyspace.strings.remove(key).is_some();
        ready(Ok(list || string)).boxed()
    }
}
