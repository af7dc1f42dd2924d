use std::{path::Path, sync::Arc};

use rusqlite::Connection;
use strongbox_core::{Properties, PropertiesFactory, StatusCode};
use strongbox_crypto::{
    codec::{DataRecord, EncryptionKeyRecord},
    InMemoryKeyProvider, SoftwareKeyStore,
};
use strongbox_storage::{
    adapter::{decode_value, encode_value},
    legacy::DEFAULT_CONFIG_URI,
    EncryptedPropertiesFactory, LegacyMigration, MigrationOutcome, MiscStorage,
    MiscStoragePropertiesFactory, SqliteMiscStorage, UriMapping, RESERVED_KEY,
};

fn encrypted_factory(db: &Path, provider: &InMemoryKeyProvider) -> EncryptedPropertiesFactory {
    let storage = Arc::new(SqliteMiscStorage::new(db));
    let adapter = MiscStoragePropertiesFactory::new(storage, UriMapping::default().shared());
    let keys = SoftwareKeyStore::new(provider.clone()).with_default_alias("default");
    EncryptedPropertiesFactory::new(Arc::new(adapter), Arc::new(keys))
}

fn raw_storage(db: &Path) -> SqliteMiscStorage {
    let raw = SqliteMiscStorage::new(db);
    raw.open().expect("open raw storage");
    raw
}

#[test]
fn values_survive_restart_and_stay_encrypted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("misc.db");
    let provider = InMemoryKeyProvider::default();

    let props = encrypted_factory(&db, &provider)
        .properties("component/config")
        .expect("container");
    props.put_bytes("token", b"secret").expect("put");
    assert_eq!(props.get_bytes("token").expect("get"), b"secret");

    let raw = raw_storage(&db);
    let row = |key: &str| {
        raw.get("component", "config", key)
            .expect("raw get")
            .unwrap_or_else(|| panic!("{key} row"))
    };

    let token_row = row("token");
    assert_ne!(token_row, "secret");
    let token = DataRecord::decode(&decode_value(&token_row).expect("base64")).expect("data record");
    assert!(token.digest_matches());
    assert_ne!(token.record.ciphertext, b"secret");

    let key_row = row(RESERVED_KEY);
    let key_record =
        EncryptionKeyRecord::decode(&decode_value(&key_row).expect("base64")).expect("key record");
    assert!(key_record.digest_matches());
    assert_eq!(key_record.record.main_key_alias, "default");

    let reopened = encrypted_factory(&db, &provider)
        .properties("component/config")
        .expect("container");
    assert_eq!(reopened.get_bytes("token").expect("get"), b"secret");
    assert_eq!(
        reopened.keys().expect("keys").into_iter().collect::<Vec<_>>(),
        vec!["token".to_string()]
    );
}

#[test]
fn tampered_value_is_reported_not_returned() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("misc.db");
    let provider = InMemoryKeyProvider::default();

    let props = encrypted_factory(&db, &provider)
        .properties("component/config")
        .expect("container");
    props.put_string("token", "secret").expect("put");

    raw_storage(&db)
        .put("component", "config", "token", &encode_value(b"garbage bytes"))
        .expect("overwrite");

    let err = props.get_string("token").expect_err("tampered");
    assert_eq!(err.status(), StatusCode::Digest);
}

#[test]
fn legacy_tables_migrate_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let db = dir.path().join("misc.db");
    let legacy_db = dir.path().join("legacy.db");
    Connection::open(&legacy_db)
        .and_then(|conn| {
            conn.execute_batch(
                "CREATE TABLE refreshToken (refreshToken TEXT);
                 INSERT INTO refreshToken VALUES ('rt-123');",
            )
        })
        .expect("seed legacy database");

    let provider = InMemoryKeyProvider::default();
    let props = encrypted_factory(&db, &provider)
        .properties(DEFAULT_CONFIG_URI)
        .expect("container");
    let legacy = Arc::new(raw_storage(&legacy_db));

    let first = LegacyMigration::new(legacy.clone(), props.clone()).run();
    assert!(first.is_success());
    assert_eq!(first.migrated(), 1);
    assert_eq!(props.get_string("refreshToken").expect("migrated"), "rt-123");

    let second = LegacyMigration::new(legacy, props.clone()).run();
    assert!(second.is_success());
    assert!(second
        .outcomes
        .iter()
        .all(|(_, outcome)| *outcome == MigrationOutcome::Absent));
    assert_eq!(props.get_string("refreshToken").expect("still there"), "rt-123");

    let raw = raw_storage(&db);
    assert_ne!(
        raw.get("authorization", "lwa", "refreshToken")
            .expect("raw get")
            .as_deref(),
        Some("rt-123")
    );
}
