//! Schema creation and forward migration.
//!
//! Every statement here is idempotent: running [`init_schema`] against a file
//! that is already at [`SCHEMA_VERSION`] changes nothing. Files written before
//! the provenance columns existed (version 1, no `index_meta` table) are
//! upgraded in place by the built-in migrations.

use layerdex_core::error::{IndexError, Result};
use rusqlite::{Connection, OptionalExtension};

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 2;

const CREATE_TABLES: &str = "
    CREATE TABLE IF NOT EXISTS layers (
        id INTEGER PRIMARY KEY,
        digest TEXT NOT NULL,
        csize INTEGER,
        usize INTEGER,
        type TEXT,
        media_type TEXT,
        indexed_at DATETIME DEFAULT CURRENT_TIMESTAMP,
        registry TEXT,
        namespace TEXT,
        repository TEXT,
        tag TEXT,
        image_ref TEXT
    );
    CREATE TABLE IF NOT EXISTS files (
        id INTEGER PRIMARY KEY,
        layer_id INTEGER NOT NULL,
        name TEXT NOT NULL,
        typeflag INTEGER,
        size INTEGER,
        mode INTEGER,
        mod DATETIME,
        offset INTEGER,
        linkname TEXT,
        FOREIGN KEY(layer_id) REFERENCES layers(id)
    );
    CREATE TABLE IF NOT EXISTS index_meta (
        id INTEGER PRIMARY KEY CHECK (id = 0),
        schema_version INTEGER NOT NULL,
        updated_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
";

const CREATE_INDICES: &str = "
    CREATE INDEX IF NOT EXISTS idx_files_name ON files(name);
    CREATE INDEX IF NOT EXISTS idx_files_layer_id ON files(layer_id);
    CREATE INDEX IF NOT EXISTS idx_layers_digest ON layers(digest);
    CREATE INDEX IF NOT EXISTS idx_layers_registry ON layers(registry);
    CREATE INDEX IF NOT EXISTS idx_layers_namespace ON layers(namespace);
    CREATE INDEX IF NOT EXISTS idx_layers_repository ON layers(repository);
    CREATE INDEX IF NOT EXISTS idx_layers_image_ref ON layers(image_ref);
";

const PROVENANCE_COLUMNS: [&str; 5] = ["registry", "namespace", "repository", "tag", "image_ref"];

/// A forward-only schema step.
trait Migration: Send + Sync {
    /// The version this migration produces
    fn version(&self) -> u32;

    /// Human-readable name for logs
    fn name(&self) -> &str;

    /// Apply the migration; runs inside the initialization transaction
    fn up(&self, conn: &Connection) -> Result<()>;
}

/// Adds the image provenance columns to `layers`.
struct AddImageProvenance;

impl Migration for AddImageProvenance {
    fn version(&self) -> u32 {
        2
    }

    fn name(&self) -> &str {
        "add_image_provenance"
    }

    fn up(&self, conn: &Connection) -> Result<()> {
        for column in PROVENANCE_COLUMNS {
            if !has_column(conn, "layers", column)? {
                conn.execute(&format!("ALTER TABLE layers ADD COLUMN {column} TEXT"), [])
                    .map_err(|e| IndexError::Transaction(e.to_string()))?;
            }
        }
        Ok(())
    }
}

fn migrations() -> Vec<Box<dyn Migration>> {
    vec![Box::new(AddImageProvenance)]
}

/// Create or upgrade the schema, returning the resulting version.
pub fn init_schema(conn: &mut Connection) -> Result<u32> {
    let tx = conn
        .transaction()
        .map_err(|e| IndexError::Transaction(e.to_string()))?;

    tx.execute_batch(CREATE_TABLES)
        .map_err(|e| IndexError::Transaction(e.to_string()))?;

    let current = match stored_version(&tx)? {
        Some(version) => version,
        None => {
            let detected = detect_version(&tx)?;
            tx.execute(
                "INSERT OR IGNORE INTO index_meta (id, schema_version) VALUES (0, ?1)",
                [detected],
            )
            .map_err(|e| IndexError::Transaction(e.to_string()))?;
            detected
        }
    };

    if current > SCHEMA_VERSION {
        return Err(IndexError::Validation(format!(
            "index file has schema version {} but this build supports up to {}",
            current, SCHEMA_VERSION
        )));
    }

    let mut pending = migrations();
    pending.retain(|m| m.version() > current);
    pending.sort_by_key(|m| m.version());
    for migration in pending {
        tracing::info!(
            version = migration.version(),
            name = migration.name(),
            "Applying schema migration"
        );
        migration.up(&tx)?;
        tx.execute(
            "UPDATE index_meta SET schema_version = ?1, updated_at = datetime('now') WHERE id = 0",
            [migration.version()],
        )
        .map_err(|e| IndexError::Transaction(e.to_string()))?;
    }

    tx.execute_batch(CREATE_INDICES)
        .map_err(|e| IndexError::Transaction(e.to_string()))?;

    tx.commit()
        .map_err(|e| IndexError::Transaction(e.to_string()))?;

    Ok(SCHEMA_VERSION)
}

/// Read the schema version marker.
#[cfg(test)]
fn schema_version(conn: &Connection) -> Result<u32> {
    stored_version(conn)?.ok_or_else(|| IndexError::Query("schema version marker missing".into()))
}

fn stored_version(conn: &Connection) -> Result<Option<u32>> {
    conn.query_row(
        "SELECT schema_version FROM index_meta WHERE id = 0",
        [],
        |row| row.get::<_, u32>(0),
    )
    .optional()
    .map_err(|e| IndexError::Query(e.to_string()))
}

/// Version of a file that predates the `index_meta` marker.
fn detect_version(conn: &Connection) -> Result<u32> {
    if has_column(conn, "layers", "registry")? {
        Ok(SCHEMA_VERSION)
    } else {
        Ok(1)
    }
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .map_err(|e| IndexError::Query(e.to_string()))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))
        .map_err(|e| IndexError::Query(e.to_string()))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(|e| IndexError::Query(e.to_string()))?;
    Ok(names.iter().any(|name| name == column))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LEGACY_SCHEMA: &str = "
        CREATE TABLE layers (
            id INTEGER PRIMARY KEY,
            digest TEXT NOT NULL,
            csize INTEGER,
            usize INTEGER,
            type TEXT,
            media_type TEXT,
            indexed_at DATETIME DEFAULT CURRENT_TIMESTAMP
        );
        CREATE TABLE files (
            id INTEGER PRIMARY KEY,
            layer_id INTEGER NOT NULL,
            name TEXT NOT NULL,
            typeflag INTEGER,
            size INTEGER,
            mode INTEGER,
            mod DATETIME,
            offset INTEGER,
            linkname TEXT,
            FOREIGN KEY(layer_id) REFERENCES layers(id)
        );
        CREATE INDEX idx_files_name ON files(name);
        CREATE INDEX idx_layers_digest ON layers(digest);
    ";

    fn index_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'index' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<String>>>()
            .unwrap()
    }

    #[test]
    fn test_fresh_schema() {
        let mut conn = Connection::open_in_memory().unwrap();
        assert_eq!(init_schema(&mut conn).unwrap(), SCHEMA_VERSION);
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
        for column in PROVENANCE_COLUMNS {
            assert!(has_column(&conn, "layers", column).unwrap());
        }
        let indices = index_names(&conn);
        for expected in [
            "idx_files_name",
            "idx_layers_digest",
            "idx_layers_registry",
            "idx_layers_namespace",
            "idx_layers_repository",
            "idx_layers_image_ref",
        ] {
            assert!(indices.iter().any(|i| i == expected), "missing {expected}");
        }
    }

    #[test]
    fn test_rerun_is_noop() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&mut conn).unwrap();
        conn.execute("INSERT INTO layers (digest) VALUES ('sha256:keep')", [])
            .unwrap();
        let before = index_names(&conn);

        assert_eq!(init_schema(&mut conn).unwrap(), SCHEMA_VERSION);

        assert_eq!(index_names(&conn), before);
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM layers", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let meta_rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM index_meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(meta_rows, 1);
    }

    #[test]
    fn test_legacy_file_is_migrated() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(LEGACY_SCHEMA).unwrap();
        conn.execute(
            "INSERT INTO layers (digest, csize, usize) VALUES ('sha256:old', 1, 2)",
            [],
        )
        .unwrap();
        assert_eq!(detect_version(&conn).unwrap(), 1);

        assert_eq!(init_schema(&mut conn).unwrap(), SCHEMA_VERSION);
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);

        let (digest, registry): (String, Option<String>) = conn
            .query_row("SELECT digest, registry FROM layers", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(digest, "sha256:old");
        assert_eq!(registry, None);
        assert!(index_names(&conn)
            .iter()
            .any(|i| i == "idx_layers_image_ref"));
    }

    #[test]
    fn test_newer_file_is_rejected() {
        let mut conn = Connection::open_in_memory().unwrap();
        init_schema(&mut conn).unwrap();
        conn.execute("UPDATE index_meta SET schema_version = 99", [])
            .unwrap();
        let err = init_schema(&mut conn).unwrap_err();
        assert!(err.to_string().contains("99"));
    }
}
