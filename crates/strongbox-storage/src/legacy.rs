//! One-shot import of legacy single-value tables into a properties container.
//!
//! Each legacy table holds one TEXT column and at most one row. A migrated
//! table is cleared and dropped, so running the migration again is a no-op.

use std::{fmt, sync::Arc};

use rusqlite::OptionalExtension;
use strongbox_core::{Properties, PropertiesError};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::misc_storage::{
    check_name,
    sqlite::{map_db_err, sqlite_table_exists},
    MiscStorageError, SqliteMiscStorage,
};

/// Container the migrated values land in unless configured otherwise.
pub const DEFAULT_CONFIG_URI: &str = "authorization/lwa";

/// Read access to legacy single-column tables.
pub trait LegacyTableStore: Send + Sync {
    fn table_exists(&self, table: &str) -> Result<bool, MiscStorageError>;

    /// Name of the first column and the first row's value in it, if any row exists.
    fn first_value(&self, table: &str) -> Result<(String, Option<String>), MiscStorageError>;

    /// Deletes every row, then drops the table.
    fn clear_and_drop(&self, table: &str) -> Result<(), MiscStorageError>;
}

impl LegacyTableStore for SqliteMiscStorage {
    fn table_exists(&self, table: &str) -> Result<bool, MiscStorageError> {
        check_name(table)?;
        self.with_conn(|conn| sqlite_table_exists(conn, table))
    }

    fn first_value(&self, table: &str) -> Result<(String, Option<String>), MiscStorageError> {
        check_name(table)?;
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT * FROM \"{table}\" LIMIT 1"))
                .map_err(map_db_err)?;
            let column = stmt.column_name(0).map_err(map_db_err)?.to_string();
            let value = stmt
                .query_row([], |row| row.get::<_, Option<String>>(0))
                .optional()
                .map_err(map_db_err)?
                .flatten();
            Ok((column, value))
        })
    }

    fn clear_and_drop(&self, table: &str) -> Result<(), MiscStorageError> {
        check_name(table)?;
        self.with_conn(|conn| {
            // Dropping an uncommitted transaction rolls it back.
            let tx = conn.unchecked_transaction().map_err(map_db_err)?;
            tx.execute_batch(&format!(
                "DELETE FROM \"{table}\"; DROP TABLE \"{table}\";"
            ))
            .map_err(map_db_err)?;
            tx.commit().map_err(map_db_err)
        })
    }
}

/// A legacy table, its expected column and the property it migrates to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegacyEntry {
    pub table: String,
    pub column: String,
    pub property: String,
}

impl LegacyEntry {
    pub fn new(
        table: impl Into<String>,
        column: impl Into<String>,
        property: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            column: column.into(),
            property: property.into(),
        }
    }

    /// Tables left behind by the previous authorization storage.
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("refreshToken", "refreshToken", "refreshToken"),
            Self::new("userId", "userId", "userId"),
        ]
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MigrationError {
    #[error("table {table} has column {found}, expected {expected}")]
    ColumnMismatch {
        table: String,
        expected: String,
        found: String,
    },
    #[error("legacy storage error: {0}")]
    Storage(#[from] MiscStorageError),
    #[error(transparent)]
    Properties(#[from] PropertiesError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The value was copied and the legacy table dropped.
    Migrated,
    /// The table is absent.
    Absent,
    /// The table exists but holds no value; it is left in place.
    Empty,
    Failed(MigrationError),
}

impl fmt::Display for MigrationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationOutcome::Migrated => f.write_str("migrated"),
            MigrationOutcome::Absent => f.write_str("absent"),
            MigrationOutcome::Empty => f.write_str("empty"),
            MigrationOutcome::Failed(err) => write!(f, "failed: {err}"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub outcomes: Vec<(LegacyEntry, MigrationOutcome)>,
}

impl MigrationReport {
    pub fn is_success(&self) -> bool {
        !self
            .outcomes
            .iter()
            .any(|(_, outcome)| matches!(outcome, MigrationOutcome::Failed(_)))
    }

    pub fn migrated(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| *outcome == MigrationOutcome::Migrated)
            .count()
    }
}

/// Copies legacy values into `properties`.
///
/// Must run before anything else reads the target container, so that the
/// first `get` sees the migrated values.
pub struct LegacyMigration {
    tables: Arc<dyn LegacyTableStore>,
    properties: Arc<dyn Properties>,
    entries: Vec<LegacyEntry>,
}

impl LegacyMigration {
    pub fn new(tables: Arc<dyn LegacyTableStore>, properties: Arc<dyn Properties>) -> Self {
        Self {
            tables,
            properties,
            entries: LegacyEntry::defaults(),
        }
    }

    pub fn with_entries(mut self, entries: Vec<LegacyEntry>) -> Self {
        self.entries = entries;
        self
    }

    /// Migrates every entry. A failing entry does not stop the others.
    #[instrument(skip_all, fields(entries = self.entries.len()))]
    pub fn run(&self) -> MigrationReport {
        let mut report = MigrationReport::default();
        for entry in &self.entries {
            let outcome = match self.migrate(entry) {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(table = %entry.table, %err, "legacy migration failed; table left in place");
                    MigrationOutcome::Failed(err)
                }
            };
            debug!(table = %entry.table, %outcome, "legacy entry processed");
            report.outcomes.push((entry.clone(), outcome));
        }
        report
    }

    fn migrate(&self, entry: &LegacyEntry) -> Result<MigrationOutcome, MigrationError> {
        if !self.tables.table_exists(&entry.table)? {
            return Ok(MigrationOutcome::Absent);
        }

        let (column, value) = self.tables.first_value(&entry.table)?;
        if column != entry.column {
            return Err(MigrationError::ColumnMismatch {
                table: entry.table.clone(),
                expected: entry.column.clone(),
                found: column,
            });
        }
        let Some(value) = value else {
            return Ok(MigrationOutcome::Empty);
        };

        self.properties.put_string(&entry.property, &value)?;
        self.tables.clear_and_drop(&entry.table)?;
        info!(table = %entry.table, property = %entry.property, "legacy value migrated");
        Ok(MigrationOutcome::Migrated)
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;
    use strongbox_core::InMemoryProperties;

    use super::*;
    use crate::misc_storage::MiscStorage;

    struct Fixture {
        _dir: tempfile::TempDir,
        path: std::path::PathBuf,
        tables: Arc<SqliteMiscStorage>,
        properties: Arc<InMemoryProperties>,
    }

    impl Fixture {
        fn new(setup: &str) -> Self {
            let dir = tempfile::tempdir().expect("tempdir");
            let path = dir.path().join("legacy.db");
            Connection::open(&path)
                .and_then(|conn| conn.execute_batch(setup))
                .expect("seed legacy database");
            let tables = Arc::new(SqliteMiscStorage::new(&path));
            tables.open().expect("open");
            Self {
                _dir: dir,
                path,
                tables,
                properties: Arc::new(InMemoryProperties::new()),
            }
        }

        fn migration(&self) -> LegacyMigration {
            LegacyMigration::new(self.tables.clone(), self.properties.clone())
        }

        fn has_table(&self, table: &str) -> bool {
            LegacyTableStore::table_exists(self.tables.as_ref(), table).unwrap()
        }
    }

    const SEEDED: &str = "
        CREATE TABLE refreshToken (refreshToken TEXT);
        INSERT INTO refreshToken VALUES ('rt-123');
        CREATE TABLE userId (userId TEXT);
        INSERT INTO userId VALUES ('user-9');
    ";

    #[test]
    fn migrates_and_drops_legacy_tables() {
        let fx = Fixture::new(SEEDED);
        let report = fx.migration().run();

        assert!(report.is_success());
        assert_eq!(report.migrated(), 2);
        assert_eq!(fx.properties.get_string("refreshToken").unwrap(), "rt-123");
        assert_eq!(fx.properties.get_string("userId").unwrap(), "user-9");
        assert!(!fx.has_table("refreshToken"));
        assert!(!fx.has_table("userId"));
    }

    #[test]
    fn second_run_changes_nothing() {
        let fx = Fixture::new(SEEDED);
        fx.migration().run();
        let report = fx.migration().run();

        assert!(report.is_success());
        assert!(report
            .outcomes
            .iter()
            .all(|(_, outcome)| *outcome == MigrationOutcome::Absent));
        assert_eq!(fx.properties.get_string("refreshToken").unwrap(), "rt-123");
    }

    #[test]
    fn absent_and_empty_tables_are_noops() {
        let fx = Fixture::new("CREATE TABLE userId (userId TEXT);");
        let report = fx.migration().run();

        assert!(report.is_success());
        assert_eq!(report.outcomes[0].1, MigrationOutcome::Absent);
        assert_eq!(report.outcomes[1].1, MigrationOutcome::Empty);
        assert!(fx.properties.keys().unwrap().is_empty());
        assert!(fx.has_table("userId"));
    }

    #[test]
    fn column_mismatch_fails_only_that_entry() {
        let fx = Fixture::new(
            "
            CREATE TABLE refreshToken (token TEXT);
            INSERT INTO refreshToken VALUES ('rt-123');
            CREATE TABLE userId (userId TEXT);
            INSERT INTO userId VALUES ('user-9');
            ",
        );
        let report = fx.migration().run();

        assert!(!report.is_success());
        assert!(matches!(
            &report.outcomes[0].1,
            MigrationOutcome::Failed(MigrationError::ColumnMismatch { found, .. }) if found == "token"
        ));
        assert_eq!(report.outcomes[1].1, MigrationOutcome::Migrated);
        assert!(fx.has_table("refreshToken"));
        assert!(fx.properties.get_string("refreshToken").is_err());
    }

    #[test]
    fn custom_entries_map_to_new_property_names() {
        let fx = Fixture::new(SEEDED);
        let report = fx
            .migration()
            .with_entries(vec![LegacyEntry::new("userId", "userId", "account")])
            .run();

        assert_eq!(report.migrated(), 1);
        assert_eq!(fx.properties.get_string("account").unwrap(), "user-9");
        assert!(fx.has_table("refreshToken"));

        let conn = Connection::open(&fx.path).unwrap();
        let remaining: i64 = conn
            .query_row("SELECT COUNT(*) FROM refreshToken", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
    }

    #[test]
    fn failed_drop_leaves_no_open_transaction() {
        let fx = Fixture::new(SEEDED);
        assert!(fx.tables.clear_and_drop("missingTable").is_err());
        let autocommit = fx
            .tables
            .with_conn(|conn| Ok(conn.is_autocommit()))
            .unwrap();
        assert!(autocommit);

        fx.tables.clear_and_drop("userId").expect("later drop commits");
        assert!(!fx.has_table("userId"));
    }

    #[test]
    fn rejects_unsafe_table_names() {
        let fx = Fixture::new(SEEDED);
        let report = fx
            .migration()
            .with_entries(vec![LegacyEntry::new("x\"; DROP TABLE userId; --", "c", "p")])
            .run();
        assert!(matches!(
            report.outcomes[0].1,
            MigrationOutcome::Failed(MigrationError::Storage(MiscStorageError::InvalidName { .. }))
        ));
        assert!(fx.has_table("userId"));
    }
}
