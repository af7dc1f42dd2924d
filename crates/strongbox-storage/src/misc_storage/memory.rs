use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use crate::misc_storage::{check_names, table_missing, MiscStorage, MiscStorageError};

type Table = HashMap<String, String>;

#[derive(Debug, Default)]
struct State {
    created: bool,
    opened: bool,
    tables: HashMap<(String, String), Table>,
    injected: Vec<MiscStorageError>,
}

/// In-memory backing store for tests and ephemeral sessions.
///
/// Clones share state, so a test can keep a handle to inspect what an
/// adapter wrote. [`InMemoryMiscStorage::fail_next`] queues failures that the
/// next data calls return before touching any table.
#[derive(Debug, Default, Clone)]
pub struct InMemoryMiscStorage {
    inner: Arc<Mutex<State>>,
}

impl InMemoryMiscStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues `count` copies of `error` for the next data calls.
    pub fn fail_next(&self, count: usize, error: MiscStorageError) {
        if let Ok(mut state) = self.inner.lock() {
            state.injected.extend(std::iter::repeat(error).take(count));
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>, MiscStorageError> {
        self.inner
            .lock()
            .map_err(|err| MiscStorageError::Database(format!("lock poisoned: {err}")))
    }

    /// Locks the store for a data call: the database must be open and any
    /// injected failure is returned first.
    fn ready(&self) -> Result<MutexGuard<'_, State>, MiscStorageError> {
        let mut state = self.lock()?;
        if !state.opened {
            return Err(MiscStorageError::NotOpen);
        }
        if !state.injected.is_empty() {
            return Err(state.injected.remove(0));
        }
        Ok(state)
    }
}

fn table_mut<'a>(
    state: &'a mut State,
    component: &str,
    table: &str,
) -> Result<&'a mut Table, MiscStorageError> {
    check_names(component, table)?;
    state
        .tables
        .get_mut(&(component.to_string(), table.to_string()))
        .ok_or_else(|| table_missing(component, table))
}

impl MiscStorage for InMemoryMiscStorage {
    fn create_database(&self) -> Result<(), MiscStorageError> {
        let mut state = self.lock()?;
        if state.created {
            return Err(MiscStorageError::DatabaseExists);
        }
        state.created = true;
        state.opened = true;
        Ok(())
    }

    fn open(&self) -> Result<(), MiscStorageError> {
        let mut state = self.lock()?;
        if !state.created {
            return Err(MiscStorageError::DatabaseMissing);
        }
        state.opened = true;
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.lock().map(|state| state.opened).unwrap_or(false)
    }

    fn create_table(&self, component: &str, table: &str) -> Result<(), MiscStorageError> {
        check_names(component, table)?;
        let mut state = self.ready()?;
        let id = (component.to_string(), table.to_string());
        if state.tables.contains_key(&id) {
            return Err(MiscStorageError::TableExists {
                component: id.0,
                table: id.1,
            });
        }
        state.tables.insert(id, Table::new());
        Ok(())
    }

    fn table_exists(&self, component: &str, table: &str) -> Result<bool, MiscStorageError> {
        check_names(component, table)?;
        let state = self.ready()?;
        Ok(state
            .tables
            .contains_key(&(component.to_string(), table.to_string())))
    }

    fn get(
        &self,
        component: &str,
        table: &str,
        key: &str,
    ) -> Result<Option<String>, MiscStorageError> {
        let mut state = self.ready()?;
        Ok(table_mut(&mut state, component, table)?.get(key).cloned())
    }

    fn put(
        &self,
        component: &str,
        table: &str,
        key: &str,
        value: &str,
    ) -> Result<(), MiscStorageError> {
        let mut state = self.ready()?;
        table_mut(&mut state, component, table)?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, component: &str, table: &str, key: &str) -> Result<(), MiscStorageError> {
        let mut state = self.ready()?;
        table_mut(&mut state, component, table)?.remove(key);
        Ok(())
    }

    fn load(&self, component: &str, table: &str) -> Result<Table, MiscStorageError> {
        let mut state = self.ready()?;
        Ok(table_mut(&mut state, component, table)?.clone())
    }

    fn clear_table(&self, component: &str, table: &str) -> Result<(), MiscStorageError> {
        let mut state = self.ready()?;
        table_mut(&mut state, component, table)?.clear();
        Ok(())
    }

    fn delete_table(&self, component: &str, table: &str) -> Result<(), MiscStorageError> {
        let mut state = self.ready()?;
        if !table_mut(&mut state, component, table)?.is_empty() {
            return Err(MiscStorageError::TableNotEmpty {
                component: component.to_string(),
                table: table.to_string(),
            });
        }
        state
            .tables
            .remove(&(component.to_string(), table.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opened() -> InMemoryMiscStorage {
        let storage = InMemoryMiscStorage::new();
        storage.create_database().expect("create");
        storage
    }

    #[test]
    fn open_requires_existing_database() {
        let storage = InMemoryMiscStorage::new();
        assert_eq!(storage.open(), Err(MiscStorageError::DatabaseMissing));
        assert!(!storage.is_opened());

        storage.create_database().expect("create");
        assert!(storage.is_opened());
        assert_eq!(storage.create_database(), Err(MiscStorageError::DatabaseExists));
        storage.open().expect("reopen");
    }

    #[test]
    fn data_calls_require_open_database() {
        let storage = InMemoryMiscStorage::new();
        assert_eq!(
            storage.table_exists("component", "config"),
            Err(MiscStorageError::NotOpen)
        );
    }

    #[test]
    fn tables_hold_string_values() {
        let storage = opened();
        assert!(!storage.table_exists("component", "config").unwrap());
        storage.create_table("component", "config").unwrap();
        assert!(storage.table_exists("component", "config").unwrap());

        storage.put("component", "config", "k", "v1").unwrap();
        storage.put("component", "config", "k", "v2").unwrap();
        assert_eq!(
            storage.get("component", "config", "k").unwrap().as_deref(),
            Some("v2")
        );
        assert_eq!(storage.get("component", "config", "missing").unwrap(), None);

        storage.remove("component", "config", "k").unwrap();
        storage.remove("component", "config", "k").unwrap();
        assert!(storage.load("component", "config").unwrap().is_empty());
    }

    #[test]
    fn delete_table_requires_empty_table() {
        let storage = opened();
        storage.create_table("c", "t").unwrap();
        storage.put("c", "t", "k", "v").unwrap();
        assert!(matches!(
            storage.delete_table("c", "t"),
            Err(MiscStorageError::TableNotEmpty { .. })
        ));

        storage.clear_table("c", "t").unwrap();
        storage.delete_table("c", "t").unwrap();
        assert!(!storage.table_exists("c", "t").unwrap());
        assert!(matches!(
            storage.get("c", "t", "k"),
            Err(MiscStorageError::TableMissing { .. })
        ));
    }

    #[test]
    fn injected_failures_are_returned_in_order() {
        let storage = opened();
        storage.create_table("c", "t").unwrap();
        storage.fail_next(2, MiscStorageError::Busy("locked".into()));

        assert!(matches!(
            storage.get("c", "t", "k"),
            Err(MiscStorageError::Busy(_))
        ));
        assert!(matches!(
            storage.put("c", "t", "k", "v"),
            Err(MiscStorageError::Busy(_))
        ));
        storage.put("c", "t", "k", "v").unwrap();
    }
}
