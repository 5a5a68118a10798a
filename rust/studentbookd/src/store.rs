//! Record store gateway.
//!
//! The engines only see `RecordStore`: an opaque collection of student
//! documents keyed by store-assigned ids. `SqliteStore` keeps one JSON
//! document per row of the workspace database.

use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;
use uuid::Uuid;

use crate::model::{StoredStudent, Student};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("student not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("malformed student document {id}: {source}")]
    Document {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failure reported by a non-SQLite backend.
    #[error("{0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

pub trait RecordStore {
    fn list(&mut self) -> StoreResult<Vec<StoredStudent>>;

    /// Stores a new document and returns the id assigned to it.
    fn create(&mut self, student: &Student) -> StoreResult<String>;

    /// Replaces every field of the document except its id.
    fn update(&mut self, id: &str, student: &Student) -> StoreResult<()>;

    fn delete(&mut self, id: &str) -> StoreResult<()>;
}

pub struct SqliteStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteStore<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteStore { conn }
    }

    pub fn get(&self, id: &str) -> StoreResult<Option<Student>> {
        let doc: Option<String> = self
            .conn
            .query_row("SELECT doc FROM students WHERE id = ?", [id], |r| r.get(0))
            .optional()?;
        doc.map(|d| {
            serde_json::from_str(&d).map_err(|source| StoreError::Document {
                id: id.to_string(),
                source,
            })
        })
        .transpose()
    }

    fn next_seq(&self) -> StoreResult<i64> {
        let seq: i64 = self
            .conn
            .query_row("SELECT COALESCE(MAX(seq), -1) + 1 FROM students", [], |r| {
                r.get(0)
            })?;
        Ok(seq)
    }
}

impl RecordStore for SqliteStore<'_> {
    fn list(&mut self) -> StoreResult<Vec<StoredStudent>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, doc FROM students ORDER BY seq")?;
        let rows = stmt
            .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, doc)| match serde_json::from_str::<Student>(&doc) {
                Ok(student) => Ok(StoredStudent { id, student }),
                Err(source) => Err(StoreError::Document { id, source }),
            })
            .collect()
    }

    fn create(&mut self, student: &Student) -> StoreResult<String> {
        let id = Uuid::new_v4().to_string();
        let doc = serde_json::to_string(student)?;
        let seq = self.next_seq()?;
        self.conn.execute(
            "INSERT INTO students(id, seq, name, grade_level, doc, updated_at)
             VALUES(?, ?, ?, ?, ?, datetime('now'))",
            (&id, seq, &student.name, &student.grade_level, &doc),
        )?;
        Ok(id)
    }

    fn update(&mut self, id: &str, student: &Student) -> StoreResult<()> {
        let doc = serde_json::to_string(student)?;
        let changed = self.conn.execute(
            "UPDATE students SET name = ?, grade_level = ?, doc = ?, updated_at = datetime('now')
             WHERE id = ?",
            (&student.name, &student.grade_level, &doc, id),
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }

    fn delete(&mut self, id: &str) -> StoreResult<()> {
        let changed = self
            .conn
            .execute("DELETE FROM students WHERE id = ?", [id])?;
        if changed == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}
