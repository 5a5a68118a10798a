mod test_support;

use serde_json::json;
use test_support::{error_code, open_workspace, request, request_ok, spawn_sidecar};

fn total_row(edit: &serde_json::Value) -> serde_json::Value {
    edit["grades"]
        .as_array()
        .expect("grades")
        .iter()
        .find(|g| g["subject"] == "合計点")
        .cloned()
        .expect("total row")
}

#[test]
fn grade_set_edits_keep_total_in_sync_and_save() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "studentbook-gradebook");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "students.create",
        json!({ "student": { "name": "田中", "grade": "中1" } }),
    );
    let id = created["id"].as_str().expect("id").to_string();

    let not_editing = request(&mut stdin, &mut reader, "2", "edit.addLesson", json!({}));
    assert_eq!(error_code(&not_editing), "invalid_state");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "view.open",
        json!({ "view": "detail", "studentId": id }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "view.selectTab",
        json!({ "tab": "grades" }),
    );
    let begun = request_ok(&mut stdin, &mut reader, "5", "edit.begin", json!({}));
    assert_eq!(begun["ui"]["editing"], true);
    assert_eq!(begun["ui"]["tab"], "grades");

    let blank = request(
        &mut stdin,
        &mut reader,
        "6",
        "edit.createGradeSet",
        json!({ "gradeLevel": "中1", "testName": "   " }),
    );
    assert_eq!(error_code(&blank), "bad_params");

    let set = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "edit.createGradeSet",
        json!({ "gradeLevel": "中1", "testName": "1学期中間" }),
    );
    let grades = set["edit"]["grades"].as_array().expect("grades");
    assert_eq!(grades.len(), 6);
    assert_eq!(grades[0]["subject"], "国語");
    assert_eq!(grades[5]["subject"], "合計点");
    assert_eq!(grades[5]["maxScore"], 500);

    let math = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "edit.updateGrade",
        json!({
            "testName": "1学期中間",
            "subject": "数学",
            "field": "score",
            "value": "85",
            "gradeLevel": "中1"
        }),
    );
    assert_eq!(total_row(&math["edit"])["score"], 85);

    let english = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "edit.updateGrade",
        json!({
            "testName": "1学期中間",
            "subject": "英語",
            "field": "score",
            "value": "abc",
            "gradeLevel": "中1"
        }),
    );
    assert_eq!(english["edit"]["grades"][2]["score"], 0);
    assert_eq!(total_row(&english["edit"])["score"], 85);

    let total_edit = request(
        &mut stdin,
        &mut reader,
        "10",
        "edit.updateGrade",
        json!({
            "testName": "1学期中間",
            "subject": "合計点",
            "field": "score",
            "value": "1",
            "gradeLevel": "中1"
        }),
    );
    assert_eq!(error_code(&total_edit), "bad_params");

    let no_match = request(
        &mut stdin,
        &mut reader,
        "11",
        "edit.updateGrade",
        json!({
            "testName": "期末",
            "subject": "数学",
            "field": "score",
            "value": "10",
            "gradeLevel": "中1"
        }),
    );
    assert_eq!(error_code(&no_match), "bad_params");

    let groups = request_ok(&mut stdin, &mut reader, "12", "grades.groups", json!({}));
    let group = &groups["groups"][0];
    assert_eq!(group["key"], "中1_1学期中間");
    assert_eq!(group["total"]["score"], 85);
    assert_eq!(group["total"]["maxScore"], 500);
    assert_eq!(group["subjectCount"], 5);
    assert_eq!(group["expanded"], false);

    let toggled = request_ok(
        &mut stdin,
        &mut reader,
        "13",
        "grades.toggleGroup",
        json!({ "key": "中1_1学期中間" }),
    );
    assert_eq!(toggled["expanded"], true);

    let removed = request_ok(
        &mut stdin,
        &mut reader,
        "14",
        "edit.deleteGrade",
        json!({ "index": 1 }),
    );
    let total = total_row(&removed["edit"]);
    assert_eq!(total["score"], 0);
    assert_eq!(total["maxScore"], 400);

    let lesson = request_ok(&mut stdin, &mut reader, "15", "edit.addLesson", json!({}));
    let date = lesson["edit"]["lessons"][0]["date"].as_str().expect("date");
    assert_eq!(date.len(), 10);
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "16",
        "edit.updateLesson",
        json!({ "index": 0, "field": "content", "value": "二次関数" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "17",
        "edit.update",
        json!({ "patch": { "notes": "部活で欠席多め" } }),
    );

    let saved = request_ok(&mut stdin, &mut reader, "18", "edit.save", json!({}));
    assert_eq!(saved["ui"]["editing"], false);
    assert_eq!(saved["ui"]["view"], "detail");

    let stored = request_ok(
        &mut stdin,
        &mut reader,
        "19",
        "students.get",
        json!({ "id": id }),
    );
    let student = &stored["student"];
    assert_eq!(student["notes"], "部活で欠席多め");
    assert_eq!(student["lessons"][0]["content"], "二次関数");
    assert_eq!(student["grades"].as_array().expect("grades").len(), 5);

    let _ = child.kill();
}

#[test]
fn add_view_draft_is_created_on_save() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "studentbook-add-view");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "view.open",
        json!({ "view": "add" }),
    );
    let unnamed = request(&mut stdin, &mut reader, "2", "edit.save", json!({}));
    assert_eq!(error_code(&unnamed), "bad_params");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "edit.update",
        json!({ "patch": { "name": "鈴木", "grade": "小3", "school": "南小" } }),
    );
    let saved = request_ok(&mut stdin, &mut reader, "4", "edit.save", json!({}));
    assert_eq!(saved["studentCount"], 1);

    let view = request_ok(&mut stdin, &mut reader, "5", "view.get", json!({}));
    assert_eq!(view["ui"]["view"], "list");
    assert_eq!(view["ui"]["editing"], false);

    let list = request_ok(&mut stdin, &mut reader, "6", "students.list", json!({}));
    assert_eq!(list["students"][0]["name"], "鈴木");
    assert_eq!(list["students"][0]["school"], "南小");

    let cancel_tab = request(
        &mut stdin,
        &mut reader,
        "7",
        "view.selectTab",
        json!({ "tab": "lessons" }),
    );
    assert_eq!(error_code(&cancel_tab), "invalid_state");

    let _ = child.kill();
}
