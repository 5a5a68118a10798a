use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::import::{StructuredImport, TabularPreview};
use crate::model::StoredStudent;
use crate::session::{ImportFlow, TransitionError, UiEvent, UiState};

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub db: Option<Connection>,
    /// Last successful full fetch of the store.
    pub students: Vec<StoredStudent>,
    pub ui: UiState,
    pub tabular_import: ImportFlow<TabularPreview>,
    pub structured_import: ImportFlow<StructuredImport>,
}

impl AppState {
    /// Applies a UI transition; a refused event leaves the state untouched.
    pub fn apply_ui(&mut self, event: UiEvent) -> Result<(), TransitionError> {
        self.ui = self.ui.clone().apply(event)?;
        Ok(())
    }
}
