use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::Mutex,
};

use rusqlite::{Connection, ErrorCode, OpenFlags, OptionalExtension};
use tracing::{debug, instrument};

use crate::misc_storage::{check_names, table_missing, MiscStorage, MiscStorageError};

/// SQLite-backed store. Each `(component, table)` pair maps to a table named
/// `<component>_<table>` with `key`/`value` TEXT columns.
#[derive(Debug)]
pub struct SqliteMiscStorage {
    path: PathBuf,
    conn: Mutex<Option<Connection>>,
}

impl SqliteMiscStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            conn: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `f` against the open connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, MiscStorageError>,
    ) -> Result<T, MiscStorageError> {
        let guard = self
            .conn
            .lock()
            .map_err(|err| MiscStorageError::Database(format!("lock poisoned: {err}")))?;
        let conn = guard.as_ref().ok_or(MiscStorageError::NotOpen)?;
        f(conn)
    }

    fn install(&self, conn: Connection) -> Result<(), MiscStorageError> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|err| MiscStorageError::Database(format!("lock poisoned: {err}")))?;
        *guard = Some(conn);
        Ok(())
    }
}

pub(crate) fn map_db_err(err: rusqlite::Error) -> MiscStorageError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if matches!(
                failure.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ) =>
        {
            MiscStorageError::Busy(err.to_string())
        }
        _ => MiscStorageError::Database(err.to_string()),
    }
}

pub(crate) fn sqlite_table_exists(conn: &Connection, name: &str) -> Result<bool, MiscStorageError> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(map_db_err)
}

fn table_name(component: &str, table: &str) -> Result<String, MiscStorageError> {
    check_names(component, table)?;
    Ok(format!("{component}_{table}"))
}

/// Resolves and checks the table, returning its quoted name.
fn existing_table(
    conn: &Connection,
    component: &str,
    table: &str,
) -> Result<String, MiscStorageError> {
    let name = table_name(component, table)?;
    if !sqlite_table_exists(conn, &name)? {
        return Err(table_missing(component, table));
    }
    Ok(format!("\"{name}\""))
}

impl MiscStorage for SqliteMiscStorage {
    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn create_database(&self) -> Result<(), MiscStorageError> {
        if self.path.exists() {
            return Err(MiscStorageError::DatabaseExists);
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| MiscStorageError::Database(e.to_string()))?;
        }
        let conn = Connection::open(&self.path).map_err(map_db_err)?;
        self.install(conn)?;
        debug!("database created");
        Ok(())
    }

    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn open(&self) -> Result<(), MiscStorageError> {
        if !self.path.exists() {
            return Err(MiscStorageError::DatabaseMissing);
        }
        let conn = Connection::open_with_flags(&self.path, OpenFlags::SQLITE_OPEN_READ_WRITE)
            .map_err(map_db_err)?;
        self.install(conn)?;
        debug!("database opened");
        Ok(())
    }

    fn is_opened(&self) -> bool {
        self.conn
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn create_table(&self, component: &str, table: &str) -> Result<(), MiscStorageError> {
        let name = table_name(component, table)?;
        self.with_conn(|conn| {
            if sqlite_table_exists(conn, &name)? {
                return Err(MiscStorageError::TableExists {
                    component: component.to_string(),
                    table: table.to_string(),
                });
            }
            conn.execute_batch(&format!(
                "CREATE TABLE \"{name}\" (key TEXT PRIMARY KEY NOT NULL, value TEXT NOT NULL);"
            ))
            .map_err(map_db_err)
        })
    }

    fn table_exists(&self, component: &str, table: &str) -> Result<bool, MiscStorageError> {
        let name = table_name(component, table)?;
        self.with_conn(|conn| sqlite_table_exists(conn, &name))
    }

    fn get(
        &self,
        component: &str,
        table: &str,
        key: &str,
    ) -> Result<Option<String>, MiscStorageError> {
        self.with_conn(|conn| {
            let name = existing_table(conn, component, table)?;
            conn.query_row(
                &format!("SELECT value FROM {name} WHERE key = ?1"),
                [key],
                |row| row.get(0),
            )
            .optional()
            .map_err(map_db_err)
        })
    }

    fn put(
        &self,
        component: &str,
        table: &str,
        key: &str,
        value: &str,
    ) -> Result<(), MiscStorageError> {
        self.with_conn(|conn| {
            let name = existing_table(conn, component, table)?;
            conn.execute(
                &format!(
                    "INSERT INTO {name} (key, value) VALUES (?1, ?2)
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value"
                ),
                [key, value],
            )
            .map_err(map_db_err)?;
            Ok(())
        })
    }

    fn remove(&self, component: &str, table: &str, key: &str) -> Result<(), MiscStorageError> {
        self.with_conn(|conn| {
            let name = existing_table(conn, component, table)?;
            conn.execute(&format!("DELETE FROM {name} WHERE key = ?1"), [key])
                .map_err(map_db_err)?;
            Ok(())
        })
    }

    fn load(
        &self,
        component: &str,
        table: &str,
    ) -> Result<HashMap<String, String>, MiscStorageError> {
        self.with_conn(|conn| {
            let name = existing_table(conn, component, table)?;
            let mut stmt = conn
                .prepare(&format!("SELECT key, value FROM {name}"))
                .map_err(map_db_err)?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
                .map_err(map_db_err)?;
            rows.collect::<Result<HashMap<_, _>, _>>()
                .map_err(map_db_err)
        })
    }

    fn clear_table(&self, component: &str, table: &str) -> Result<(), MiscStorageError> {
        self.with_conn(|conn| {
            let name = existing_table(conn, component, table)?;
            conn.execute(&format!("DELETE FROM {name}"), [])
                .map_err(map_db_err)?;
            Ok(())
        })
    }

    fn delete_table(&self, component: &str, table: &str) -> Result<(), MiscStorageError> {
        self.with_conn(|conn| {
            let name = existing_table(conn, component, table)?;
            let rows: i64 = conn
                .query_row(&format!("SELECT COUNT(*) FROM {name}"), [], |row| row.get(0))
                .map_err(map_db_err)?;
            if rows > 0 {
                return Err(MiscStorageError::TableNotEmpty {
                    component: component.to_string(),
                    table: table.to_string(),
                });
            }
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {name};"))
                .map_err(map_db_err)
        })
    }
}
