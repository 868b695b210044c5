//! Read-side lookups: layers by digest or provenance, files by name.
//!
//! Every query runs on a pooled read-only connection. File searches are
//! lazy: [`FileMatches`] fetches keyset pages ordered by `(name, id)` and
//! hands the connection back to the pool between pages.

use layerdex_core::{
    error::{IndexError, Phase, Result},
    observe, Deadline, FileEntry, FileId, ImageFilter, Layer, LayerId,
};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, Params, Row};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use crate::store::{Backend, LayerIndex};
use crate::timestamp;

const LAYER_COLUMNS: &str = "l.id, l.digest, l.csize, l.usize, l.type, l.media_type, \
     l.indexed_at, l.registry, l.namespace, l.repository, l.tag, l.image_ref";
const LAYER_COLUMN_COUNT: usize = 12;

const FILE_COLUMNS: &str =
    "f.id, f.layer_id, f.name, f.typeflag, f.size, f.mode, f.mod, f.offset, f.linkname";

/// How a file name is compared in [`LayerIndex::find_files_by_name`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameMatch {
    /// The whole path, e.g. `/etc/passwd`
    Exact(String),
    /// Paths starting with the given text; wildcard characters are literal
    Prefix(String),
    /// Paths ending with the given text; wildcard characters are literal
    Suffix(String),
    /// A raw SQLite `GLOB` pattern (case-sensitive `*`, `?`, `[...]`)
    Glob(String),
}

impl NameMatch {
    fn condition(&self) -> (&'static str, String) {
        match self {
            NameMatch::Exact(name) => ("f.name = ?", name.clone()),
            NameMatch::Prefix(prefix) => ("f.name GLOB ?", format!("{}*", escape_glob(prefix))),
            NameMatch::Suffix(suffix) => ("f.name GLOB ?", format!("*{}", escape_glob(suffix))),
            NameMatch::Glob(pattern) => ("f.name GLOB ?", pattern.clone()),
        }
    }
}

/// Which layers a file search looks in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum FileScope {
    #[default]
    All,
    /// Layers recorded under this digest
    Digest(String),
    /// Layers whose provenance matches the filter
    Image(ImageFilter),
}

/// A file together with the layer that contains it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileMatch {
    pub layer: Layer,
    pub file: FileEntry,
}

impl LayerIndex {
    /// All layers recorded under `digest`, oldest first.
    pub fn find_layers_by_digest(&self, digest: &str) -> Result<Vec<Layer>> {
        self.find_layers_by_digest_with_deadline(digest, &Deadline::none())
    }

    pub fn find_layers_by_digest_with_deadline(
        &self,
        digest: &str,
        deadline: &Deadline,
    ) -> Result<Vec<Layer>> {
        let sql = format!("SELECT {LAYER_COLUMNS} FROM layers l WHERE l.digest = ?1 ORDER BY l.id");
        self.read("find_layers_by_digest", deadline, |conn| {
            collect_rows(conn, &sql, [digest], deadline, |row| map_layer(row, 0))
        })
    }

    /// Layers whose provenance matches every field set in `filter`, most
    /// recently indexed first. An empty filter matches every layer.
    pub fn find_layers_by_image(&self, filter: &ImageFilter) -> Result<Vec<Layer>> {
        self.find_layers_by_image_with_deadline(filter, &Deadline::none())
    }

    pub fn find_layers_by_image_with_deadline(
        &self,
        filter: &ImageFilter,
        deadline: &Deadline,
    ) -> Result<Vec<Layer>> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();
        push_image_conditions(filter, &mut clauses, &mut values);

        let sql = format!(
            "SELECT {LAYER_COLUMNS} FROM layers l{} ORDER BY l.indexed_at DESC, l.id DESC",
            where_clause(&clauses)
        );
        self.read("find_layers_by_image", deadline, |conn| {
            collect_rows(conn, &sql, params_from_iter(values.iter()), deadline, |row| {
                map_layer(row, 0)
            })
        })
    }

    pub fn get_layer(&self, id: LayerId) -> Result<Option<Layer>> {
        self.get_layer_with_deadline(id, &Deadline::none())
    }

    pub fn get_layer_with_deadline(&self, id: LayerId, deadline: &Deadline) -> Result<Option<Layer>> {
        let sql = format!("SELECT {LAYER_COLUMNS} FROM layers l WHERE l.id = ?1");
        let layers = self.read("get_layer", deadline, |conn| {
            collect_rows(conn, &sql, [id.0], deadline, |row| map_layer(row, 0))
        })?;
        Ok(layers.into_iter().next())
    }

    /// The file listing of one layer in TOC order.
    pub fn files_for_layer(&self, id: LayerId) -> Result<Vec<FileEntry>> {
        self.files_for_layer_with_deadline(id, &Deadline::none())
    }

    pub fn files_for_layer_with_deadline(
        &self,
        id: LayerId,
        deadline: &Deadline,
    ) -> Result<Vec<FileEntry>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files f WHERE f.layer_id = ?1 ORDER BY f.id");
        self.read("files_for_layer", deadline, |conn| {
            collect_rows(conn, &sql, [id.0], deadline, |row| map_file(row, 0))
        })
    }

    /// Lazily search file names across the layers in `scope`.
    ///
    /// Results are ordered by name, then file id. Rows are fetched in pages of
    /// `query_page_size`; nothing is read until the iterator is polled.
    ///
    /// # Example
    /// ```ignore
    /// for hit in index.find_files_by_name(NameMatch::Exact("/etc/passwd".into()), FileScope::All)? {
    ///     let hit = hit?;
    ///     println!("{} in {}", hit.file.name, hit.layer.digest);
    /// }
    /// ```
    pub fn find_files_by_name(&self, name: NameMatch, scope: FileScope) -> Result<FileMatches> {
        self.find_files_by_name_with_deadline(name, scope, Deadline::none())
    }

    pub fn find_files_by_name_with_deadline(
        &self,
        name: NameMatch,
        scope: FileScope,
        deadline: Deadline,
    ) -> Result<FileMatches> {
        let backend = self.backend()?;

        let (name_clause, pattern) = name.condition();
        let mut clauses = vec![name_clause.to_string()];
        let mut values = vec![Value::Text(pattern)];
        match &scope {
            FileScope::All => {}
            FileScope::Digest(digest) => {
                clauses.push("l.digest = ?".to_string());
                values.push(Value::Text(digest.clone()));
            }
            FileScope::Image(filter) => push_image_conditions(filter, &mut clauses, &mut values),
        }

        tracing::debug!(?name, ?scope, "Starting file search");
        Ok(FileMatches {
            backend,
            clauses,
            values,
            cursor: None,
            buffer: VecDeque::new(),
            deadline,
            page_size: self.config().query_page_size.max(1),
            done: false,
            rows: 0,
            started: Instant::now(),
        })
    }

    fn read<T>(
        &self,
        query: &'static str,
        deadline: &Deadline,
        f: impl FnOnce(&Connection) -> Result<Vec<T>>,
    ) -> Result<Vec<T>> {
        let backend = self.backend()?;
        let start = Instant::now();
        let conn = backend.readers.acquire_until(deadline)?;
        let rows = f(conn.connection())?;
        drop(conn);

        observe::record_query(query, start.elapsed(), rows.len());
        tracing::debug!(query, rows = rows.len(), elapsed = ?start.elapsed(), "Query complete");
        Ok(rows)
    }
}

/// Lazy, paged iterator over file search results.
///
/// Holds no database connection between pages. Stops after the first error.
pub struct FileMatches {
    backend: Arc<Backend>,
    clauses: Vec<String>,
    values: Vec<Value>,
    /// `(name, id)` of the last row handed out
    cursor: Option<(String, i64)>,
    buffer: VecDeque<FileMatch>,
    deadline: Deadline,
    page_size: usize,
    done: bool,
    rows: usize,
    started: Instant,
}

impl FileMatches {
    fn fetch_page(&mut self) -> Result<()> {
        let mut clauses = self.clauses.clone();
        let mut values = self.values.clone();
        if let Some((name, id)) = &self.cursor {
            clauses.push("(f.name, f.id) > (?, ?)".to_string());
            values.push(Value::Text(name.clone()));
            values.push(Value::Integer(*id));
        }
        values.push(Value::Integer(self.page_size as i64));

        let sql = format!(
            "SELECT {LAYER_COLUMNS}, {FILE_COLUMNS} FROM files f JOIN layers l ON l.id = f.layer_id{} \
             ORDER BY f.name, f.id LIMIT ?",
            where_clause(&clauses)
        );

        let conn = self.backend.readers.acquire_until(&self.deadline)?;
        let page = collect_rows(
            conn.connection(),
            &sql,
            params_from_iter(values.iter()),
            &self.deadline,
            |row| {
                Ok(FileMatch {
                    layer: map_layer(row, 0)?,
                    file: map_file(row, LAYER_COLUMN_COUNT)?,
                })
            },
        )?;
        drop(conn);

        if page.len() < self.page_size {
            self.done = true;
        }
        if let Some(last) = page.last() {
            self.cursor = Some((last.file.name.clone(), last.file.id.0));
        }
        self.rows += page.len();
        self.buffer.extend(page);

        if self.done {
            observe::record_query("find_files_by_name", self.started.elapsed(), self.rows);
            tracing::debug!(rows = self.rows, elapsed = ?self.started.elapsed(), "File search complete");
        }
        Ok(())
    }
}

impl Iterator for FileMatches {
    type Item = Result<FileMatch>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(hit) = self.buffer.pop_front() {
            return Some(Ok(hit));
        }
        if self.done {
            return None;
        }
        if let Err(e) = self.fetch_page() {
            self.done = true;
            self.buffer.clear();
            return Some(Err(e));
        }
        self.buffer.pop_front().map(Ok)
    }
}

fn push_image_conditions(filter: &ImageFilter, clauses: &mut Vec<String>, values: &mut Vec<Value>) {
    for (column, value) in filter.conditions() {
        clauses.push(format!("l.{column} = ?"));
        values.push(Value::Text(value.to_string()));
    }
}

fn where_clause(clauses: &[String]) -> String {
    if clauses.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", clauses.join(" AND "))
    }
}

/// Make every character of `text` match literally inside a GLOB pattern.
fn escape_glob(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '*' => out.push_str("[*]"),
            '?' => out.push_str("[?]"),
            '[' => out.push_str("[[]"),
            c => out.push(c),
        }
    }
    out
}

fn query_err(e: rusqlite::Error) -> IndexError {
    IndexError::Query(e.to_string())
}

fn collect_rows<T, P, F>(
    conn: &Connection,
    sql: &str,
    params: P,
    deadline: &Deadline,
    map: F,
) -> Result<Vec<T>>
where
    P: Params,
    F: Fn(&Row<'_>) -> rusqlite::Result<T>,
{
    let mut stmt = conn.prepare_cached(sql).map_err(query_err)?;
    let mut rows = stmt.query(params).map_err(query_err)?;
    let mut out = Vec::new();
    while let Some(row) = rows.next().map_err(query_err)? {
        deadline.check(Phase::Query)?;
        out.push(map(row).map_err(query_err)?);
    }
    Ok(out)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

fn map_layer(row: &Row<'_>, base: usize) -> rusqlite::Result<Layer> {
    Ok(Layer {
        id: LayerId(row.get(base)?),
        digest: row.get(base + 1)?,
        csize: row.get::<_, Option<i64>>(base + 2)?.unwrap_or(0),
        usize: row.get::<_, Option<i64>>(base + 3)?.unwrap_or(0),
        archive_type: row.get::<_, Option<String>>(base + 4)?.unwrap_or_default(),
        media_type: row.get::<_, Option<String>>(base + 5)?.unwrap_or_default(),
        indexed_at: timestamp::column(row, base + 6)?,
        registry: non_empty(row.get(base + 7)?),
        namespace: non_empty(row.get(base + 8)?),
        repository: non_empty(row.get(base + 9)?),
        tag: non_empty(row.get(base + 10)?),
        image_ref: non_empty(row.get(base + 11)?),
    })
}

fn map_file(row: &Row<'_>, base: usize) -> rusqlite::Result<FileEntry> {
    Ok(FileEntry {
        id: FileId(row.get(base)?),
        layer_id: LayerId(row.get(base + 1)?),
        name: row.get(base + 2)?,
        typeflag: row.get::<_, Option<i64>>(base + 3)?.unwrap_or(0) as u8,
        size: row.get::<_, Option<i64>>(base + 4)?.unwrap_or(0),
        mode: row.get::<_, Option<i64>>(base + 5)?.unwrap_or(0) as u32,
        mod_time: timestamp::column(row, base + 6)?,
        offset: row.get::<_, Option<i64>>(base + 7)?.unwrap_or(0),
        linkname: row.get::<_, Option<String>>(base + 8)?.unwrap_or_default(),
    })
}
