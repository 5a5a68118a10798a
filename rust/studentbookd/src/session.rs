//! View/edit state and import flows as explicit state machines.
//!
//! Transitions are pure: `apply` consumes the state and an event and returns
//! the next state or the reason the event is not allowed. Store access stays
//! in the IPC handlers.

use std::collections::BTreeSet;

use serde_json::{json, Value};

use crate::import::{StructuredImport, TabularPreview};
use crate::model::Student;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailTab {
    Info,
    Lessons,
    Grades,
}

impl DetailTab {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "info" => Some(Self::Info),
            "lessons" => Some(Self::Lessons),
            "grades" => Some(Self::Grades),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Lessons => "lessons",
            Self::Grades => "grades",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum View {
    List,
    Detail { student_id: String, tab: DetailTab },
    Add,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListFilter {
    pub grade_level: Option<String>,
    pub name_query: String,
}

impl ListFilter {
    pub fn matches(&self, s: &Student) -> bool {
        let grade_ok = match &self.grade_level {
            Some(g) => s.grade_level == *g,
            None => true,
        };
        grade_ok && s.name.contains(&self.name_query)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct UiState {
    pub view: View,
    /// Edit buffer; present while editing a student or drafting a new one.
    pub edit: Option<Student>,
    pub expanded: BTreeSet<String>,
    pub filter: ListFilter,
}

impl Default for UiState {
    fn default() -> Self {
        UiState {
            view: View::List,
            edit: None,
            expanded: BTreeSet::new(),
            filter: ListFilter::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub enum UiEvent {
    OpenList,
    SelectStudent(String),
    SelectTab(DetailTab),
    BeginAdd,
    BeginEdit(Student),
    EditChanged(Student),
    CancelEdit,
    /// The edit buffer was persisted (save or add).
    Persisted,
    StudentRemoved(String),
    ToggleGroup(String),
    SetFilter(ListFilter),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError(pub String);

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn refuse<T>(msg: &str) -> Result<T, TransitionError> {
    Err(TransitionError(msg.to_string()))
}

impl UiState {
    pub fn apply(self, event: UiEvent) -> Result<UiState, TransitionError> {
        let mut next = self;
        match event {
            UiEvent::OpenList => {
                next.view = View::List;
                next.edit = None;
            }
            UiEvent::SelectStudent(student_id) => {
                next.view = View::Detail {
                    student_id,
                    tab: DetailTab::Info,
                };
                next.edit = None;
                next.expanded.clear();
            }
            UiEvent::SelectTab(tab) => match next.view {
                View::Detail { student_id, .. } => {
                    next.view = View::Detail { student_id, tab };
                }
                _ => return refuse("tabs exist only in the detail view"),
            },
            UiEvent::BeginAdd => {
                next.view = View::Add;
                next.edit = Some(Student::default());
            }
            UiEvent::BeginEdit(student) => {
                if !matches!(next.view, View::Detail { .. }) {
                    return refuse("open a student before editing");
                }
                next.edit = Some(student);
            }
            UiEvent::EditChanged(student) => {
                if next.edit.is_none() {
                    return refuse("not editing");
                }
                next.edit = Some(student);
            }
            UiEvent::CancelEdit => {
                if next.view == View::Add {
                    next.view = View::List;
                }
                next.edit = None;
            }
            UiEvent::Persisted => {
                if next.edit.is_none() {
                    return refuse("not editing");
                }
                if next.view == View::Add {
                    next.view = View::List;
                }
                next.edit = None;
            }
            UiEvent::StudentRemoved(id) => {
                if let View::Detail { student_id, .. } = &next.view {
                    if *student_id == id {
                        next.view = View::List;
                        next.edit = None;
                    }
                }
            }
            UiEvent::ToggleGroup(key) => {
                if !next.expanded.remove(&key) {
                    next.expanded.insert(key);
                }
            }
            UiEvent::SetFilter(filter) => {
                next.filter = filter;
            }
        }
        Ok(next)
    }

    pub fn selected_student_id(&self) -> Option<&str> {
        match &self.view {
            View::Detail { student_id, .. } => Some(student_id.as_str()),
            _ => None,
        }
    }

    pub fn to_json(&self) -> Value {
        let (view, student_id, tab) = match &self.view {
            View::List => ("list", None, None),
            View::Detail { student_id, tab } => {
                ("detail", Some(student_id.clone()), Some(tab.as_str()))
            }
            View::Add => ("add", None, None),
        };
        json!({
            "view": view,
            "studentId": student_id,
            "tab": tab,
            "editing": self.edit.is_some(),
            "edit": self.edit,
            "expanded": self.expanded,
            "filter": {
                "gradeLevel": self.filter.grade_level,
                "nameQuery": self.filter.name_query,
            }
        })
    }
}

/// Something that can be confirmed only when it holds at least one valid row.
pub trait Preview {
    fn has_valid_rows(&self) -> bool;
}

impl Preview for TabularPreview {
    fn has_valid_rows(&self) -> bool {
        !self.preview.is_empty()
    }
}

impl Preview for StructuredImport {
    fn has_valid_rows(&self) -> bool {
        !self.records.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImportFlow<P> {
    Idle,
    FileSelected { source: String },
    Previewed { source: String, preview: P },
    Confirmed { source: String, preview: P },
    Committed { source: String },
    Failed { source: String, message: String },
}

impl<P> Default for ImportFlow<P> {
    fn default() -> Self {
        ImportFlow::Idle
    }
}

#[derive(Debug, Clone)]
pub enum ImportEvent<P> {
    SelectFile(String),
    PreviewReady(P),
    Confirm,
    Succeeded,
    Failed(String),
    Cancel,
}

impl<P: Preview> ImportFlow<P> {
    pub fn apply(self, event: ImportEvent<P>) -> Result<ImportFlow<P>, TransitionError> {
        match (self, event) {
            // A new file always discards whatever came before.
            (_, ImportEvent::SelectFile(source)) => Ok(ImportFlow::FileSelected { source }),
            (_, ImportEvent::Cancel) => Ok(ImportFlow::Idle),
            (ImportFlow::FileSelected { source }, ImportEvent::PreviewReady(preview)) => {
                Ok(ImportFlow::Previewed { source, preview })
            }
            (ImportFlow::FileSelected { source }, ImportEvent::Failed(message)) => {
                Ok(ImportFlow::Failed { source, message })
            }
            (ImportFlow::Previewed { source, preview }, ImportEvent::Confirm) => {
                if !preview.has_valid_rows() {
                    return refuse("nothing valid to import");
                }
                Ok(ImportFlow::Confirmed { source, preview })
            }
            (ImportFlow::Confirmed { source, .. }, ImportEvent::Succeeded) => {
                Ok(ImportFlow::Committed { source })
            }
            (ImportFlow::Confirmed { source, .. }, ImportEvent::Failed(message)) => {
                Ok(ImportFlow::Failed { source, message })
            }
            (state, _) => refuse(&format!("event not allowed in {} state", state.phase())),
        }
    }

    pub fn phase(&self) -> &'static str {
        match self {
            ImportFlow::Idle => "idle",
            ImportFlow::FileSelected { .. } => "file-selected",
            ImportFlow::Previewed { preview, .. } => {
                if preview.has_valid_rows() {
                    "previewed-valid"
                } else {
                    "previewed-invalid"
                }
            }
            ImportFlow::Confirmed { .. } => "confirmed",
            ImportFlow::Committed { .. } => "committed",
            ImportFlow::Failed { .. } => "failed",
        }
    }

    pub fn preview(&self) -> Option<&P> {
        match self {
            ImportFlow::Previewed { preview, .. } | ImportFlow::Confirmed { preview, .. } => {
                Some(preview)
            }
            _ => None,
        }
    }

    pub fn can_confirm(&self) -> bool {
        matches!(self, ImportFlow::Previewed { preview, .. } if preview.has_valid_rows())
    }
}
