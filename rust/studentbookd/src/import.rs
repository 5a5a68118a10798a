//! Tabular (CSV) and structured (JSON) import reconciliation.
//!
//! Validation and parsing are pure; the commit functions drive any
//! `RecordStore` with the documented delete-then-create ordering.

use std::collections::HashSet;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::model::{GradeLevel, StoredStudent, Student};
use crate::store::{RecordStore, StoreResult};
use crate::tabular::{self, TabularRow};

pub const COL_NAME: &str = "名前";
pub const COL_GRADE: &str = "学年";
pub const COL_SCHOOL: &str = "学校名";
pub const COL_NOTES: &str = "留意事項";
pub const TABULAR_COLUMNS: [&str; 4] = [COL_NAME, COL_GRADE, COL_SCHOOL, COL_NOTES];

/// Data rows start on line 2 of the file.
const HEADER_LINES: usize = 1;

pub const STRUCTURED_PARSE_ERROR: &str = "JSONの読み込みに失敗しました";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowErrorKind {
    MissingRequired,
    InvalidGradeLevel,
    Duplicate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowError {
    pub line: usize,
    pub kind: RowErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TabularPreview {
    pub preview: Vec<Student>,
    pub errors: Vec<RowError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    Append,
    Overwrite,
}

impl ImportMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "append" => Some(Self::Append),
            "overwrite" => Some(Self::Overwrite),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Append => "append",
            Self::Overwrite => "overwrite",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StructuredMode {
    /// Replace the whole collection.
    All,
    /// Upsert one student matched by (name, grade).
    Single,
}

impl StructuredMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "single" => Some(Self::Single),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Single => "single",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructuredImport {
    pub records: Vec<Student>,
    pub mode: StructuredMode,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub deleted: usize,
    pub created: usize,
    pub updated: usize,
}

fn cell<'a>(row: &'a TabularRow, key: &str) -> &'a str {
    row.get(key).map(|s| s.as_str()).unwrap_or("")
}

/// Validates header-keyed rows against the enumeration and the existing
/// collection. Every row is checked; failures never stop the batch.
pub fn validate_and_preview_tabular(
    rows: &[TabularRow],
    existing: &[StoredStudent],
) -> TabularPreview {
    let known: HashSet<(&str, &str)> = existing
        .iter()
        .map(|s| s.student.identity_key())
        .collect();

    let mut out = TabularPreview::default();
    for (i, row) in rows.iter().enumerate() {
        let line = i + 1 + HEADER_LINES;
        let name = cell(row, COL_NAME);
        let grade = cell(row, COL_GRADE);

        if name.is_empty() || grade.is_empty() {
            out.errors.push(RowError {
                line,
                kind: RowErrorKind::MissingRequired,
                message: format!("{line}行目: 名前・学年は必須です"),
            });
            continue;
        }
        if GradeLevel::from_label(grade).is_none() {
            out.errors.push(RowError {
                line,
                kind: RowErrorKind::InvalidGradeLevel,
                message: format!("{line}行目: 学年「{grade}」は不正です"),
            });
            continue;
        }
        if known.contains(&(name, grade)) {
            out.errors.push(RowError {
                line,
                kind: RowErrorKind::Duplicate,
                message: format!("{line}行目: 「{name}（{grade}）」は既に存在します"),
            });
            continue;
        }

        out.preview.push(Student {
            name: name.to_string(),
            grade_level: grade.to_string(),
            school: cell(row, COL_SCHOOL).to_string(),
            notes: cell(row, COL_NOTES).to_string(),
            lessons: Vec::new(),
            grades: Vec::new(),
        });
    }
    out
}

/// Parses CSV text and validates it in one step.
pub fn preview_tabular_text(text: &str, existing: &[StoredStudent]) -> TabularPreview {
    validate_and_preview_tabular(&tabular::parse_rows(text), existing)
}

/// Overwrite deletes every existing student before the first create.
pub fn commit_tabular_import<S: RecordStore + ?Sized>(
    store: &mut S,
    preview: &[Student],
    mode: ImportMode,
    existing: &[StoredStudent],
) -> StoreResult<ImportSummary> {
    let mut summary = ImportSummary::default();
    if mode == ImportMode::Overwrite {
        for s in existing {
            store.delete(&s.id)?;
            summary.deleted += 1;
        }
    }
    for row in preview {
        store.create(row)?;
        summary.created += 1;
    }
    info!(
        mode = mode.as_str(),
        deleted = summary.deleted,
        created = summary.created,
        "tabular import committed"
    );
    Ok(summary)
}

/// An array is a bulk-replace candidate set; a single object is a targeted
/// upsert. Malformed input yields no records and one error.
pub fn parse_structured_import(raw_text: &str) -> StructuredImport {
    let failed = |detail: String| {
        debug!(%detail, "structured import parse failed");
        StructuredImport {
            records: Vec::new(),
            mode: StructuredMode::All,
            errors: vec![STRUCTURED_PARSE_ERROR.to_string()],
        }
    };

    let value: Value = match serde_json::from_str(raw_text) {
        Ok(v) => v,
        Err(e) => return failed(e.to_string()),
    };
    let (items, mode) = match value {
        Value::Array(items) => (items, StructuredMode::All),
        obj @ Value::Object(_) => (vec![obj], StructuredMode::Single),
        other => return failed(format!("expected array or object, got {other}")),
    };

    let mut records = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        if !item.is_object() {
            return failed(format!("element {i} is not an object"));
        }
        match serde_json::from_value::<Student>(item) {
            Ok(s) => records.push(s),
            Err(e) => return failed(format!("element {i}: {e}")),
        }
    }
    StructuredImport {
        records,
        mode,
        errors: Vec::new(),
    }
}

/// Modes a user may pick for a candidate set: `all` when the set is the same
/// size as the collection or a single record, `single` only for one record.
pub fn allowed_structured_modes(candidates: usize, existing: usize) -> Vec<StructuredMode> {
    let mut out = Vec::new();
    if candidates == existing || candidates == 1 {
        out.push(StructuredMode::All);
    }
    if candidates == 1 {
        out.push(StructuredMode::Single);
    }
    out
}

/// `all`: delete everything, wait `settle`, then create every record.
/// `single`: update the student matching (name, grade) or create it.
pub fn commit_structured_import<S: RecordStore + ?Sized>(
    store: &mut S,
    records: &[Student],
    mode: StructuredMode,
    existing: &[StoredStudent],
    settle: Duration,
) -> StoreResult<ImportSummary> {
    let mut summary = ImportSummary::default();
    match mode {
        StructuredMode::All => {
            for s in existing {
                store.delete(&s.id)?;
                summary.deleted += 1;
            }
            if !settle.is_zero() {
                std::thread::sleep(settle);
            }
            for r in records {
                store.create(r)?;
                summary.created += 1;
            }
        }
        StructuredMode::Single => {
            let Some(target) = records.first() else {
                return Ok(summary);
            };
            let matched = existing
                .iter()
                .find(|s| s.student.identity_key() == target.identity_key());
            match matched {
                Some(s) => {
                    store.update(&s.id, target)?;
                    summary.updated += 1;
                }
                None => {
                    store.create(target)?;
                    summary.created += 1;
                }
            }
        }
    }
    info!(
        mode = mode.as_str(),
        deleted = summary.deleted,
        created = summary.created,
        updated = summary.updated,
        "structured import committed"
    );
    Ok(summary)
}

pub fn tabular_template() -> String {
    tabular::header_line(&TABULAR_COLUMNS)
}

/// Pretty-printed JSON array of the full collection, ids included.
pub fn export_structured(students: &[StoredStudent]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(students)
}
