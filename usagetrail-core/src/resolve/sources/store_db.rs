//! Companion store database backend
//!
//! Reads `(store_item_id, title, bundle_id)` rows from a side table in a
//! second SQLite file. Item ids are stored as integers or text depending on
//! the producer, so keys are compared as trimmed strings.

use crate::config::LookupKind;
use crate::error::{Error, Result};
use crate::resolve::{IdentitySource, LookupKey};
use crate::types::{AppIdentity, CellValue, UNKNOWN_APP, UNKNOWN_BUNDLE_ID};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;

/// Resolves identifiers from a companion metadata database.
pub struct StoreDbSource {
    path: PathBuf,
    table: String,
}

impl StoreDbSource {
    pub fn new(path: PathBuf, table: String) -> Self {
        Self { path, table }
    }

    fn query(
        &self,
        conn: &Connection,
        keys: &BTreeSet<String>,
    ) -> Result<HashMap<String, AppIdentity>> {
        let table: Option<String> = conn
            .query_row(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1 COLLATE NOCASE",
                [&self.table],
                |row| row.get(0),
            )
            .optional()?;
        let table = table.ok_or_else(|| {
            Error::Lookup(format!(
                "table {} not found in {}",
                self.table,
                self.path.display()
            ))
        })?;

        let sql = format!(
            "SELECT store_item_id, title, bundle_id FROM \"{}\"",
            table.replace('"', "\"\"")
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query([])?;

        let mut identities = HashMap::new();
        while let Some(row) = rows.next()? {
            let id = CellValue::from(row.get::<_, rusqlite::types::Value>(0)?);
            if id.is_null() {
                continue;
            }
            let key = id.to_string().trim().to_string();
            if !keys.contains(&key) {
                continue;
            }

            let title = text_or(row.get(1)?, UNKNOWN_APP);
            let bundle_id = text_or(row.get(2)?, UNKNOWN_BUNDLE_ID);
            identities.insert(key.clone(), AppIdentity::new(key, title, bundle_id));
        }

        Ok(identities)
    }
}

fn text_or(value: rusqlite::types::Value, fallback: &str) -> String {
    match CellValue::from(value) {
        CellValue::Null => fallback.to_string(),
        other => other.to_string().trim().to_string(),
    }
}

impl IdentitySource for StoreDbSource {
    fn kind(&self) -> LookupKind {
        LookupKind::StoreDb
    }

    fn key_space(&self) -> LookupKey {
        LookupKey::AdamId
    }

    fn location(&self) -> String {
        self.path.display().to_string()
    }

    fn lookup(&self, keys: &BTreeSet<String>) -> Result<HashMap<String, AppIdentity>> {
        if !self.path.is_file() {
            return Err(Error::Lookup(format!(
                "companion database not found: {}",
                self.path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            &self.path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        let identities = self.query(&conn, keys);
        conn.close().map_err(|(_, e)| Error::Database(e))?;
        identities
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn keys(values: &[&str]) -> BTreeSet<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn create_store_db(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("storeitems.sqlite");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE store_items (store_item_id, title TEXT, bundle_id TEXT);
             INSERT INTO store_items VALUES (12345, 'Example App', 'com.example.app');
             INSERT INTO store_items VALUES ('  678 ', 'Padded', 'com.padded');
             INSERT INTO store_items VALUES (999, NULL, NULL);
             INSERT INTO store_items VALUES (NULL, 'Orphan', 'com.orphan');",
        )
        .unwrap();
        path
    }

    #[test]
    fn test_lookup_coerces_keys_to_strings() {
        let dir = TempDir::new().unwrap();
        let source = StoreDbSource::new(create_store_db(&dir), "store_items".to_string());

        let found = source.lookup(&keys(&["12345", "678", "404"])).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found["12345"].bundle_id, "com.example.app");
        assert_eq!(found["678"].display_name, "Padded");
    }

    #[test]
    fn test_null_columns_fall_back_to_sentinels() {
        let dir = TempDir::new().unwrap();
        let source = StoreDbSource::new(create_store_db(&dir), "STORE_ITEMS".to_string());

        let found = source.lookup(&keys(&["999"])).unwrap();
        assert!(found["999"].is_unknown());
    }

    #[test]
    fn test_missing_table_is_error() {
        let dir = TempDir::new().unwrap();
        let source = StoreDbSource::new(create_store_db(&dir), "apps".to_string());
        assert!(matches!(
            source.lookup(&keys(&["1"])).unwrap_err(),
            Error::Lookup(_)
        ));
    }

    #[test]
    fn test_missing_database_is_error() {
        let dir = TempDir::new().unwrap();
        let source = StoreDbSource::new(dir.path().join("absent.db"), "store_items".to_string());
        assert!(source.lookup(&keys(&["1"])).is_err());
    }
}
