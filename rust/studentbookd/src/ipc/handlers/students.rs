use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::helpers::{get_opt_str, get_required_str, reload_students, require_db};
use crate::ipc::types::{AppState, Request};
use crate::model::{GradeLevel, StoredStudent, Student};
use crate::session::{ListFilter, UiEvent, View};
use crate::store::{RecordStore, SqliteStore, StoreError};
use serde_json::{json, Value};
use tracing::info;

pub const NAME_REQUIRED_MESSAGE: &str = "名前を入力してください";

pub fn student_json(s: &StoredStudent) -> Value {
    let mut v = serde_json::to_value(&s.student).unwrap_or_else(|_| json!({}));
    v["id"] = json!(s.id);
    v
}

fn summary_json(s: &StoredStudent) -> Value {
    json!({
        "id": s.id,
        "name": s.student.name,
        "grade": s.student.grade_level,
        "school": s.student.school,
        "lessonCount": s.student.lessons.len(),
        "gradeCount": s.student.grades.len(),
    })
}

/// Reads `name`, `grade`, `school`, `notes`, `lessons`, `grades` from a
/// student-shaped object; unknown keys are ignored.
pub fn parse_student(v: &Value) -> Result<Student, HandlerErr> {
    if !v.is_object() {
        return Err(HandlerErr::bad_params("student must be an object"));
    }
    serde_json::from_value(v.clone()).map_err(|e| HandlerErr::bad_params(e.to_string()))
}

/// Creates a student from `params.student`, or from the add draft when the
/// add view is open.
pub fn create_student(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let student = match params.get("student") {
        Some(v) => parse_student(v)?,
        None => match (&state.ui.view, &state.ui.edit) {
            (View::Add, Some(draft)) => draft.clone(),
            _ => return Err(HandlerErr::bad_params("missing student")),
        },
    };
    if student.name.trim().is_empty() {
        return Err(HandlerErr::bad_params(NAME_REQUIRED_MESSAGE));
    }

    let conn = require_db(state)?;
    let id = SqliteStore::new(conn)
        .create(&student)
        .map_err(|e| HandlerErr::store("db_insert_failed", e))?;
    info!(%id, grade = %student.grade_level, "student created");

    if state.ui.view == View::Add {
        state.apply_ui(UiEvent::Persisted)?;
    }
    reload_students(state)?;
    Ok(json!({ "id": id, "studentCount": state.students.len() }))
}

fn list_students(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    // Explicit params override the view filter for this call only.
    let filter = filter_from_params(&state.ui.filter, params)?;
    let rows = state
        .students
        .iter()
        .filter(|s| filter.matches(&s.student))
        .map(summary_json)
        .collect::<Vec<_>>();
    Ok(json!({
        "students": rows,
        "total": state.students.len()
    }))
}

fn handle_students_list(state: &mut AppState, req: &Request) -> Value {
    respond(&req.id, list_students(state, &req.params))
}

fn handle_students_refresh(state: &mut AppState, req: &Request) -> Value {
    let res = reload_students(state).map(|_| json!({ "studentCount": state.students.len() }));
    respond(&req.id, res)
}

fn get_student(state: &AppState, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let conn = require_db(state)?;
    let student = SqliteStore::new(conn)
        .get(&id)
        .map_err(|e| HandlerErr::store("db_query_failed", e))?
        .ok_or_else(|| HandlerErr::store("db_query_failed", StoreError::NotFound(id.clone())))?;
    Ok(json!({ "student": student_json(&StoredStudent { id, student }) }))
}

fn handle_students_get(state: &mut AppState, req: &Request) -> Value {
    respond(&req.id, get_student(state, &req.params))
}

fn handle_students_create(state: &mut AppState, req: &Request) -> Value {
    respond(&req.id, create_student(state, &req.params))
}

fn delete_student(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let id = get_required_str(params, "id")?;
    let conn = require_db(state)?;
    SqliteStore::new(conn)
        .delete(&id)
        .map_err(|e| HandlerErr::store("db_delete_failed", e))?;
    info!(%id, "student deleted");
    state.apply_ui(UiEvent::StudentRemoved(id.clone()))?;
    reload_students(state)?;
    Ok(json!({ "id": id, "studentCount": state.students.len() }))
}

fn handle_students_delete(state: &mut AppState, req: &Request) -> Value {
    respond(&req.id, delete_student(state, &req.params))
}

fn handle_grade_levels_list(_state: &mut AppState, req: &Request) -> Value {
    let labels = GradeLevel::ALL.iter().map(|g| g.label()).collect::<Vec<_>>();
    respond(&req.id, Ok(json!({ "gradeLevels": labels })))
}

pub fn filter_from_params(current: &ListFilter, params: &Value) -> Result<ListFilter, HandlerErr> {
    let mut next = current.clone();
    if params.get("gradeLevel").is_some() {
        next.grade_level = get_opt_str(params, "gradeLevel")?
            .filter(|g| !g.is_empty())
            .map(|g| g.to_string());
    }
    if let Some(q) = get_opt_str(params, "nameQuery")? {
        next.name_query = q.to_string();
    }
    Ok(next)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "students.list" => Some(handle_students_list(state, req)),
        "students.refresh" => Some(handle_students_refresh(state, req)),
        "students.get" => Some(handle_students_get(state, req)),
        "students.create" => Some(handle_students_create(state, req)),
        "students.delete" => Some(handle_students_delete(state, req)),
        "gradeLevels.list" => Some(handle_grade_levels_list(state, req)),
        _ => None,
    }
}
