use crate::timestamp;
use chrono::{DateTime, Utc};
use layerdex_core::{
    error::{IndexError, Result},
    ImageContext, LayerId, Toc, TocFile,
};
use rusqlite::{params, Connection, OptionalExtension};

const INSERT_LAYER: &str = "INSERT INTO layers
    (digest, csize, usize, type, media_type, indexed_at, registry, namespace, repository, tag, image_ref)
    VALUES (?1, ?2, ?3, ?4, ?5, COALESCE(?6, CURRENT_TIMESTAMP), ?7, ?8, ?9, ?10, ?11)";

const INSERT_FILE: &str = "INSERT INTO files
    (layer_id, name, typeflag, size, mode, mod, offset, linkname)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

// Write transaction over the writer connection; rolls back unless committed
pub struct IndexWriteTxn<'a> {
    conn: &'a Connection,
    in_txn: bool,
}

impl<'a> IndexWriteTxn<'a> {
    pub fn begin(conn: &'a Connection) -> Result<Self> {
        conn.execute("BEGIN IMMEDIATE TRANSACTION", [])
            .map_err(|e| IndexError::Transaction(e.to_string()))?;

        Ok(Self { conn, in_txn: true })
    }

    /// Lowest layer id already recorded for `digest`, if any.
    pub fn existing_layer(&self, digest: &str) -> Result<Option<LayerId>> {
        self.conn
            .query_row(
                "SELECT id FROM layers WHERE digest = ?1 ORDER BY id LIMIT 1",
                [digest],
                |row| row.get::<_, i64>(0),
            )
            .optional()
            .map(|id| id.map(LayerId))
            .map_err(|e| IndexError::Transaction(e.to_string()))
    }

    /// Insert the layer row. Empty provenance fields are stored as NULL and
    /// `indexed_at` falls back to the database clock.
    pub fn insert_layer(
        &mut self,
        digest: &str,
        toc: &Toc,
        image: Option<&ImageContext>,
        indexed_at: Option<DateTime<Utc>>,
    ) -> Result<LayerId> {
        let indexed_at = indexed_at.as_ref().map(timestamp::to_sql);
        self.conn
            .execute(
                INSERT_LAYER,
                params![
                    digest,
                    toc.csize,
                    toc.usize,
                    toc.archive_type,
                    toc.media_type,
                    indexed_at,
                    image.and_then(ImageContext::registry),
                    image.and_then(ImageContext::namespace),
                    image.and_then(ImageContext::repository),
                    image.and_then(ImageContext::tag),
                    image.and_then(ImageContext::image_ref),
                ],
            )
            .map_err(|e| IndexError::Transaction(e.to_string()))?;

        Ok(LayerId(self.conn.last_insert_rowid()))
    }

    pub fn insert_file(&mut self, layer_id: LayerId, file: &TocFile) -> Result<()> {
        let mut stmt = self
            .conn
            .prepare_cached(INSERT_FILE)
            .map_err(|e| IndexError::Transaction(e.to_string()))?;
        let mod_time = file.effective_mod_time().as_ref().map(timestamp::to_sql);
        stmt.execute(params![
            layer_id.0,
            file.name,
            file.typeflag as i64,
            file.size,
            file.mode as i64,
            mod_time,
            file.offset,
            file.linkname,
        ])
        .map_err(|e| IndexError::Transaction(format!("file '{}': {}", file.name, e)))?;
        Ok(())
    }

    pub fn commit(mut self) -> Result<()> {
        if self.in_txn {
            self.conn
                .execute("COMMIT", [])
                .map_err(|e| IndexError::Transaction(e.to_string()))?;

            self.in_txn = false;
        }
        Ok(())
    }

    pub fn rollback(mut self) {
        if self.in_txn {
            let _ = self.conn.execute("ROLLBACK", []);
            self.in_txn = false;
        }
    }
}

impl<'a> Drop for IndexWriteTxn<'a> {
    fn drop(&mut self) {
        if self.in_txn {
            let _ = self.conn.execute("ROLLBACK", []);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn setup() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        schema::init_schema(&mut conn).unwrap();
        conn
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    fn toc() -> Toc {
        Toc::new(100, 200)
            .with_archive_type("tar+gzip")
            .with_file(TocFile::new("/etc/hosts").with_size(12))
            .with_file(TocFile::new("/bin/sh").with_typeflag(b'2').with_linkname("busybox"))
    }

    #[test]
    fn test_commit_persists_layer_and_files() {
        let conn = setup();
        let toc = toc();

        let mut txn = IndexWriteTxn::begin(&conn).unwrap();
        let id = txn.insert_layer("sha256:abc", &toc, None, None).unwrap();
        for file in &toc.files {
            txn.insert_file(id, file).unwrap();
        }
        txn.commit().unwrap();

        assert_eq!(count(&conn, "layers"), 1);
        assert_eq!(count(&conn, "files"), 2);
        let indexed_at: Option<String> = conn
            .query_row("SELECT indexed_at FROM layers", [], |row| row.get(0))
            .unwrap();
        assert!(indexed_at.is_some());
    }

    #[test]
    fn test_drop_rolls_back() {
        let conn = setup();
        {
            let mut txn = IndexWriteTxn::begin(&conn).unwrap();
            let id = txn.insert_layer("sha256:abc", &toc(), None, None).unwrap();
            txn.insert_file(id, &TocFile::new("/a")).unwrap();
        }
        assert_eq!(count(&conn, "layers"), 0);
        assert_eq!(count(&conn, "files"), 0);

        let mut txn = IndexWriteTxn::begin(&conn).unwrap();
        txn.insert_layer("sha256:abc", &toc(), None, None).unwrap();
        txn.rollback();
        assert_eq!(count(&conn, "layers"), 0);
    }

    #[test]
    fn test_empty_provenance_is_null() {
        let conn = setup();
        let image = ImageContext {
            registry: "ghcr.io".into(),
            ..Default::default()
        };

        let mut txn = IndexWriteTxn::begin(&conn).unwrap();
        txn.insert_layer("sha256:abc", &toc(), Some(&image), None)
            .unwrap();
        txn.commit().unwrap();

        let (registry, tag): (Option<String>, Option<String>) = conn
            .query_row("SELECT registry, tag FROM layers", [], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .unwrap();
        assert_eq!(registry.as_deref(), Some("ghcr.io"));
        assert_eq!(tag, None);
    }

    #[test]
    fn test_existing_layer_returns_lowest_id() {
        let conn = setup();
        let mut txn = IndexWriteTxn::begin(&conn).unwrap();
        assert_eq!(txn.existing_layer("sha256:abc").unwrap(), None);
        let first = txn.insert_layer("sha256:abc", &toc(), None, None).unwrap();
        txn.insert_layer("sha256:abc", &toc(), None, None).unwrap();
        assert_eq!(txn.existing_layer("sha256:abc").unwrap(), Some(first));
        txn.commit().unwrap();
    }
}
