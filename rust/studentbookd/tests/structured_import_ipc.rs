mod test_support;

use serde_json::json;
use test_support::{error_code, open_workspace, request, request_ok, spawn_sidecar};

fn create(
    stdin: &mut std::process::ChildStdin,
    reader: &mut std::io::BufReader<std::process::ChildStdout>,
    id: &str,
    student: serde_json::Value,
) {
    let _ = request_ok(stdin, reader, id, "students.create", json!({ "student": student }));
}

#[test]
fn export_then_reimport_all_reproduces_collection() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let workspace = open_workspace(&mut stdin, &mut reader, "studentbook-structured");

    create(&mut stdin, &mut reader, "1", json!({ "name": "田中", "grade": "中1", "school": "北中" }));
    create(
        &mut stdin,
        &mut reader,
        "2",
        json!({
            "name": "佐藤",
            "grade": "高2",
            "lessons": [{ "date": "2024-04-10", "subject": "数学", "content": "数列" }],
            "grades": [{ "subject": "数学", "test": "中間", "grade": "高2", "score": 70, "maxScore": 100 }]
        }),
    );
    create(&mut stdin, &mut reader, "3", json!({ "name": "鈴木", "grade": "小3" }));

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "export.structured",
        json!({ "outPath": workspace.to_string_lossy() }),
    );
    let path = exported["path"].as_str().expect("path").to_string();
    assert!(path.ends_with("students_backup.json"));
    let before: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).expect("read backup")).expect("json");
    assert_eq!(before.as_array().expect("array").len(), 3);
    assert!(before[0]["id"].is_string());

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "import.structured.preview",
        json!({ "inPath": path }),
    );
    assert_eq!(preview["detectedMode"], "all");
    assert_eq!(preview["allowedModes"], json!(["all"]));
    assert_eq!(preview["records"].as_array().expect("records").len(), 3);

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "import.structured.apply",
        json!({}),
    );
    assert_eq!(applied["deleted"], 3);
    assert_eq!(applied["created"], 3);

    let after = request_ok(&mut stdin, &mut reader, "7", "export.structured", json!({}));
    assert_eq!(after["fileName"], "students_backup.json");
    let after: serde_json::Value =
        serde_json::from_str(after["text"].as_str().expect("text")).expect("json");

    let strip_ids = |v: &serde_json::Value| -> Vec<serde_json::Value> {
        v.as_array()
            .expect("array")
            .iter()
            .map(|s| {
                let mut s = s.clone();
                s.as_object_mut().expect("object").remove("id");
                s
            })
            .collect()
    };
    assert_eq!(strip_ids(&before), strip_ids(&after));
    assert_ne!(before[0]["id"], after[0]["id"]);

    let _ = child.kill();
}

#[test]
fn single_object_upserts_by_name_and_grade() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "studentbook-structured-single");

    create(&mut stdin, &mut reader, "1", json!({ "name": "田中", "grade": "中1", "school": "北中" }));
    create(&mut stdin, &mut reader, "2", json!({ "name": "佐藤", "grade": "中2" }));
    create(&mut stdin, &mut reader, "3", json!({ "name": "鈴木", "grade": "中3" }));

    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "import.structured.preview",
        json!({ "text": "{\"name\":\"田中\",\"grade\":\"中1\",\"school\":\"南中\"}" }),
    );
    assert_eq!(preview["detectedMode"], "single");
    assert_eq!(preview["allowedModes"], json!(["all", "single"]));

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "import.structured.apply",
        json!({ "mode": "single" }),
    );
    assert_eq!(updated["updated"], 1);
    assert_eq!(updated["studentCount"], 3);

    let list = request_ok(&mut stdin, &mut reader, "6", "students.list", json!({}));
    assert_eq!(list["students"][0]["name"], "田中");
    assert_eq!(list["students"][0]["school"], "南中");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "import.structured.preview",
        json!({ "text": "{\"name\":\"新人\",\"grade\":\"小1\"}" }),
    );
    let created = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "import.structured.apply",
        json!({}),
    );
    assert_eq!(created["created"], 1);
    assert_eq!(created["studentCount"], 4);

    let _ = child.kill();
}

#[test]
fn backup_restores_into_empty_workspace() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "studentbook-structured-restore");

    let backup = "[{\"name\":\"A\",\"grade\":\"小1\"},{\"name\":\"B\",\"grade\":\"小2\"}]";
    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.structured.preview",
        json!({ "text": backup }),
    );
    assert_eq!(preview["detectedMode"], "all");
    assert_eq!(preview["canConfirm"], true);

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "import.structured.apply",
        json!({}),
    );
    assert_eq!(applied["deleted"], 0);
    assert_eq!(applied["created"], 2);

    let list = request_ok(&mut stdin, &mut reader, "3", "students.list", json!({}));
    assert_eq!(list["total"], 2);

    let _ = child.kill();
}

#[test]
fn differently_sized_backup_replaces_collection() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "studentbook-structured-resize");

    create(&mut stdin, &mut reader, "1", json!({ "name": "田中", "grade": "中1" }));
    create(&mut stdin, &mut reader, "2", json!({ "name": "佐藤", "grade": "中2" }));
    create(&mut stdin, &mut reader, "3", json!({ "name": "鈴木", "grade": "中3" }));

    let backup = "[{\"name\":\"A\",\"grade\":\"小1\"},{\"name\":\"B\",\"grade\":\"小2\"}]";
    let preview = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "import.structured.preview",
        json!({ "text": backup }),
    );
    assert_eq!(preview["detectedMode"], "all");
    assert_eq!(preview["allowedModes"], json!([]));

    // Switching a multi-record set to single mode is refused.
    let refused = request(
        &mut stdin,
        &mut reader,
        "5",
        "import.structured.apply",
        json!({ "mode": "single" }),
    );
    assert_eq!(error_code(&refused), "bad_params");

    let applied = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "import.structured.apply",
        json!({}),
    );
    assert_eq!(applied["deleted"], 3);
    assert_eq!(applied["created"], 2);
    assert_eq!(applied["studentCount"], 2);

    let _ = child.kill();
}

#[test]
fn malformed_json_offers_no_modes_and_cannot_be_applied() {
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = open_workspace(&mut stdin, &mut reader, "studentbook-structured-malformed");

    let malformed = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "import.structured.preview",
        json!({ "text": "{oops" }),
    );
    assert_eq!(malformed["phase"], "previewed-invalid");
    assert_eq!(malformed["errors"], json!(["JSONの読み込みに失敗しました"]));
    assert_eq!(malformed["allowedModes"], json!([]));

    let refused = request(
        &mut stdin,
        &mut reader,
        "2",
        "import.structured.apply",
        json!({}),
    );
    assert_eq!(error_code(&refused), "invalid_state");

    let null_fields = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "import.structured.preview",
        json!({ "text": "{\"name\":\"A\",\"grade\":\"小1\",\"school\":null}" }),
    );
    assert_eq!(null_fields["phase"], "previewed-valid");
    assert_eq!(null_fields["records"][0]["school"], "");

    let _ = child.kill();
}
