use crate::grades::{self, GradeField, GradeGroup};
use crate::ipc::error::{respond, HandlerErr};
use crate::ipc::handlers::setup;
use crate::ipc::handlers::students::{create_student, filter_from_params};
use crate::ipc::helpers::{
    get_opt_str, get_required_index, get_required_str, reload_students, require_db,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Lesson, Student, TOTAL_SUBJECT};
use crate::session::{DetailTab, UiEvent, View};
use crate::store::{RecordStore, SqliteStore};
use serde_json::{json, Value};
use tracing::info;

fn ui_json(state: &AppState) -> Value {
    json!({ "ui": state.ui.to_json() })
}

fn open_view(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let view = get_required_str(params, "view")?;
    let event = match view.as_str() {
        "list" => UiEvent::OpenList,
        "add" => UiEvent::BeginAdd,
        "detail" => {
            let id = get_required_str(params, "studentId")?;
            if !state.students.iter().any(|s| s.id == id) {
                return Err(HandlerErr::new("not_found", format!("student not found: {id}"))
                    .with_details(json!({ "id": id })));
            }
            UiEvent::SelectStudent(id)
        }
        other => return Err(HandlerErr::bad_params(format!("unknown view: {other}"))),
    };
    state.apply_ui(event)?;
    Ok(ui_json(state))
}

fn select_tab(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let raw = get_required_str(params, "tab")?;
    let tab = DetailTab::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params("tab must be one of: info, lessons, grades"))?;
    state.apply_ui(UiEvent::SelectTab(tab))?;
    Ok(ui_json(state))
}

fn set_filter(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let filter = filter_from_params(&state.ui.filter, params)?;
    state.apply_ui(UiEvent::SetFilter(filter))?;
    Ok(ui_json(state))
}

fn selected_student(state: &AppState) -> Result<&Student, HandlerErr> {
    let id = state
        .ui
        .selected_student_id()
        .ok_or_else(|| HandlerErr::new("invalid_state", "no student selected"))?;
    state
        .students
        .iter()
        .find(|s| s.id == id)
        .map(|s| &s.student)
        .ok_or_else(|| {
            HandlerErr::new("not_found", format!("student not found: {id}"))
                .with_details(json!({ "id": id }))
        })
}

fn begin_edit(state: &mut AppState) -> Result<Value, HandlerErr> {
    let student = selected_student(state)?.clone();
    state.apply_ui(UiEvent::BeginEdit(student))?;
    Ok(ui_json(state))
}

fn cancel_edit(state: &mut AppState) -> Result<Value, HandlerErr> {
    state.apply_ui(UiEvent::CancelEdit)?;
    Ok(ui_json(state))
}

/// Clone of the edit buffer; mutations go back through `store_buffer`.
fn edit_buffer(state: &AppState) -> Result<Student, HandlerErr> {
    state
        .ui
        .edit
        .clone()
        .ok_or_else(|| HandlerErr::new("invalid_state", "not editing"))
}

fn store_buffer(state: &mut AppState, student: Student) -> Result<Value, HandlerErr> {
    state.apply_ui(UiEvent::EditChanged(student))?;
    Ok(json!({ "edit": state.ui.edit }))
}

fn update_fields(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let patch = params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params("patch must be an object"))?;
    let mut draft = edit_buffer(state)?;
    for (k, v) in patch {
        let s = v
            .as_str()
            .ok_or_else(|| HandlerErr::bad_params(format!("{k} must be a string")))?
            .to_string();
        match k.as_str() {
            "name" => draft.name = s,
            "grade" => draft.grade_level = s,
            "school" => draft.school = s,
            "notes" => draft.notes = s,
            _ => return Err(HandlerErr::bad_params(format!("unknown student field: {k}"))),
        }
    }
    store_buffer(state, draft)
}

fn add_lesson(state: &mut AppState) -> Result<Value, HandlerErr> {
    let mut draft = edit_buffer(state)?;
    draft.lessons.insert(0, Lesson::dated_today());
    store_buffer(state, draft)
}

fn update_lesson(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let index = get_required_index(params, "index")?;
    let field = get_required_str(params, "field")?;
    let value = get_opt_str(params, "value")?.unwrap_or("").to_string();
    let mut draft = edit_buffer(state)?;
    let lesson = draft
        .lessons
        .get_mut(index)
        .ok_or_else(|| HandlerErr::bad_params(format!("no lesson at index {index}")))?;
    match field.as_str() {
        "date" => lesson.date = value,
        "subject" => lesson.subject = value,
        "instructor" => lesson.instructor = value,
        "content" => lesson.content = value,
        "homework" => lesson.homework = value,
        "comment" => lesson.comment = value,
        other => return Err(HandlerErr::bad_params(format!("unknown lesson field: {other}"))),
    }
    store_buffer(state, draft)
}

fn delete_lesson(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let index = get_required_index(params, "index")?;
    let mut draft = edit_buffer(state)?;
    if index >= draft.lessons.len() {
        return Err(HandlerErr::bad_params(format!("no lesson at index {index}")));
    }
    draft.lessons.remove(index);
    store_buffer(state, draft)
}

fn create_grade_set(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let grade_level = get_opt_str(params, "gradeLevel")?.unwrap_or("");
    let test_name = get_opt_str(params, "testName")?.unwrap_or("");
    let mut draft = edit_buffer(state)?;
    draft.grades = grades::create_grade_set(&draft.grades, grade_level, test_name)
        .ok_or_else(|| HandlerErr::bad_params("gradeLevel and testName are required"))?;
    let key = format!("{}_{}", grade_level.trim(), test_name.trim());

    let expand = match state.db.as_ref() {
        Some(conn) => setup::expand_new_groups(conn)
            .map_err(|e| HandlerErr::new("db_query_failed", e.to_string()))?,
        None => false,
    };
    let res = store_buffer(state, draft)?;
    if expand && !state.ui.expanded.contains(&key) {
        state.apply_ui(UiEvent::ToggleGroup(key))?;
    }
    Ok(res)
}

/// Accepts the raw value as a string or a JSON number.
fn raw_value(params: &Value) -> Result<String, HandlerErr> {
    match params.get("value") {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(HandlerErr::bad_params("value must be a string or number")),
    }
}

fn update_grade(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let subject = get_required_str(params, "subject")?;
    if subject == TOTAL_SUBJECT {
        return Err(HandlerErr::bad_params("the total row is computed from its subjects"));
    }
    let test_name = get_opt_str(params, "testName")?.unwrap_or("");
    let grade_level = get_opt_str(params, "gradeLevel")?.unwrap_or("");
    let field_raw = get_required_str(params, "field")?;
    let field = GradeField::parse(&field_raw).ok_or_else(|| {
        HandlerErr::bad_params("field must be one of: score, maxScore, average")
    })?;
    let value = raw_value(params)?;

    let mut draft = edit_buffer(state)?;
    draft.grades = grades::update_entry_field(
        &draft.grades,
        test_name,
        &subject,
        field,
        &value,
        grade_level,
    )
    .ok_or_else(|| {
        HandlerErr::bad_params("no grade entry matches")
            .with_details(json!({ "testName": test_name, "subject": subject, "gradeLevel": grade_level }))
    })?;
    store_buffer(state, draft)
}

fn delete_grade(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let index = get_required_index(params, "index")?;
    let mut draft = edit_buffer(state)?;
    draft.grades = grades::delete_entry(&draft.grades, index)
        .ok_or_else(|| HandlerErr::bad_params(format!("no grade entry at index {index}")))?;
    store_buffer(state, draft)
}

fn save(state: &mut AppState) -> Result<Value, HandlerErr> {
    match state.ui.view.clone() {
        View::Add => create_student(state, &Value::Null),
        View::Detail { student_id, .. } => {
            let draft = edit_buffer(state)?;
            let conn = require_db(state)?;
            SqliteStore::new(conn)
                .update(&student_id, &draft)
                .map_err(|e| HandlerErr::store("db_update_failed", e))?;
            info!(id = %student_id, "student saved");
            state.apply_ui(UiEvent::Persisted)?;
            reload_students(state)?;
            Ok(json!({ "id": student_id, "ui": state.ui.to_json() }))
        }
        View::List => Err(HandlerErr::new("invalid_state", "nothing to save")),
    }
}

fn group_json(group: &GradeGroup, expanded: bool) -> Value {
    let members = group
        .members
        .iter()
        .map(|(index, entry)| json!({ "index": index, "entry": entry }))
        .collect::<Vec<_>>();
    json!({
        "key": group.key,
        "gradeLabel": group.grade_label,
        "testLabel": group.test_label,
        "expanded": expanded,
        "total": group.total().map(|t| json!({ "score": t.score, "maxScore": t.max_score })),
        "subjectCount": group.subjects().count(),
        "members": members,
    })
}

fn grade_groups(state: &AppState) -> Result<Value, HandlerErr> {
    let student = match &state.ui.edit {
        Some(draft) => draft,
        None => selected_student(state)?,
    };
    let groups = grades::group_for_display(&student.grades)
        .iter()
        .map(|g| group_json(g, state.ui.expanded.contains(&g.key)))
        .collect::<Vec<_>>();
    Ok(json!({ "groups": groups, "editing": state.ui.edit.is_some() }))
}

fn toggle_group(state: &mut AppState, params: &Value) -> Result<Value, HandlerErr> {
    let key = get_required_str(params, "key")?;
    state.apply_ui(UiEvent::ToggleGroup(key.clone()))?;
    Ok(json!({ "key": key, "expanded": state.ui.expanded.contains(&key) }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let p = &req.params;
    let res = match req.method.as_str() {
        "view.get" => Ok(ui_json(state)),
        "view.open" => open_view(state, p),
        "view.selectTab" => select_tab(state, p),
        "view.setFilter" => set_filter(state, p),
        "edit.begin" => begin_edit(state),
        "edit.cancel" => cancel_edit(state),
        "edit.update" => update_fields(state, p),
        "edit.addLesson" => add_lesson(state),
        "edit.updateLesson" => update_lesson(state, p),
        "edit.deleteLesson" => delete_lesson(state, p),
        "edit.createGradeSet" => create_grade_set(state, p),
        "edit.updateGrade" => update_grade(state, p),
        "edit.deleteGrade" => delete_grade(state, p),
        "edit.save" => save(state),
        "grades.groups" => grade_groups(state),
        "grades.toggleGroup" => toggle_group(state, p),
        _ => return None,
    };
    Some(respond(&req.id, res))
}
