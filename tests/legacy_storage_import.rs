mod common;

use common::{temp_dir, Sidecar};
use serde_json::json;

fn legacy_entries() -> serde_json::Value {
    let students = json!([
        { "id": "s1", "name": "Kim", "grade": 1, "class": 1, "number": 1,
          "isHomeSchool": false, "homeSchoolStartDate": "", "homeSchoolEndDate": "" },
        { "id": "s2", "name": "Lee", "grade": 1, "class": 1, "number": 2 },
        { "id": "broken", "name": "No Grade" }
    ]);
    let records = json!([
        { "id": "s1-2024-04-10-1", "studentId": "s1", "date": "2024-04-10", "period": 1,
          "status": "late", "sessionId": "2024-1학기" },
        { "id": "s2-2024-04-10-1", "studentId": "s2", "date": "2024-04-10", "period": 1,
          "status": "absent", "note": "cold", "sessionId": "2024-1학기" }
    ]);
    let sessions = json!([
        { "id": "2023-2학기", "name": "2023 2학기", "type": "2학기",
          "startDate": "2023-09-01", "endDate": "2023-12-31", "year": 2023,
          "isActive": false, "createdAt": "2023-08-20T00:00:00.000Z" },
        { "id": "2024-1학기", "name": "2024 1학기", "type": "1학기",
          "startDate": "2024-03-01", "endDate": "2024-06-30", "year": 2024,
          "isActive": true, "createdAt": "2024-02-20T00:00:00.000Z" }
    ]);
    let users = json!([
        { "id": "u1", "name": "Old Admin", "email": "old@school.kr", "role": "admin",
          "password": "Legacy#2024", "createdAt": "2023-03-01T00:00:00.000Z" }
    ]);
    json!({
        // The browser stored JSON-encoded strings.
        "neungju_students": students.to_string(),
        "neungju_attendance_records_2024-1학기": records.to_string(),
        "neungju_archived_records_2023-2학기": json!([
            { "id": "s1-2023-10-04-1", "studentId": "s1", "date": "2023-10-04", "period": 1, "status": "sick" }
        ]),
        "neungju_sessions": sessions,
        "neungju_users": users.to_string(),
        "neungju_holidays": "[\"2024-03-01\", \"not-a-date\"]",
        "neungju_pending_attendance": json!([
            { "id": "p1", "studentId": "s2", "date": "2024-04-11", "period": 2, "status": "late",
              "checkedBy": "u1", "checkedAt": "2024-04-11T01:00:00.000Z" }
        ]),
        "neungju_weekly_reports": json!([
            { "id": "2024-W10", "weekStartDate": "2024-03-04", "weekEndDate": "2024-03-10",
              "generatedAt": "2024-03-11T00:00:00.000Z", "insights": [] }
        ]),
        "neungju_current_user": "{\"id\":\"u1\"}",
        "neungju_theme": "dark",
        "unrelated": "x"
    })
}

#[test]
fn browser_storage_dump_imports_into_a_fresh_workspace() {
    let workspace = temp_dir("attendanced-legacy");
    let mut sidecar = Sidecar::spawn();
    sidecar.open_workspace(&workspace);

    let summary = sidecar.ok("import.legacyStorage", json!({ "entries": legacy_entries() }));
    assert_eq!(summary["imported"]["students"], json!(2));
    assert_eq!(summary["skipped"]["students"], json!(1));
    assert_eq!(summary["imported"]["records"], json!(2));
    assert_eq!(summary["imported"]["archivedRecords"], json!(1));
    assert_eq!(summary["imported"]["sessions"], json!(2));
    assert_eq!(summary["imported"]["users"], json!(1));
    assert_eq!(summary["imported"]["holidays"], json!(1));
    assert_eq!(summary["skipped"]["holidays"], json!(1));
    assert_eq!(summary["imported"]["pending"], json!(1));
    assert_eq!(summary["imported"]["weeklyReports"], json!(1));
    let mut unknown: Vec<&str> = summary["unknownKeys"]
        .as_array()
        .expect("unknown keys")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    unknown.sort();
    assert_eq!(unknown, vec!["neungju_theme", "unrelated"]);
    assert_eq!(summary["warnings"].as_array().map(|w| w.len()), Some(1));

    // Imported accounts now guard the workspace.
    assert_eq!(sidecar.err_code("students.list", json!({})), "not_authenticated");
    sidecar.ok(
        "auth.login",
        json!({ "identifier": "old@school.kr", "password": "Legacy#2024" }),
    );

    let sessions = sidecar.ok("sessions.list", json!({}));
    assert_eq!(sessions["activeSessionId"], json!("2024-first_semester"));

    let day = sidecar.ok(
        "attendance.dayOpen",
        json!({ "grade": 1, "class": 1, "date": "2024-04-10" }),
    );
    assert_eq!(day["sessionId"], json!("2024-first_semester"));
    let rows = day["students"].as_array().expect("rows");
    assert_eq!(rows[0]["cells"][0]["status"], json!("late"));
    assert_eq!(rows[1]["cells"][0]["status"], json!("absent"));
    assert_eq!(rows[1]["cells"][0]["note"], json!("cold"));
    assert_eq!(rows[1]["pendingCount"], json!(0), "pending is on another date");
    assert_eq!(sidecar.ok("pending.count", json!({}))["count"], json!(1));

    let restorable = sidecar.ok("sessions.switch", json!({ "id": "2023-second_semester" }));
    assert_eq!(restorable["restorableRecordCount"], json!(1));

    let reports = sidecar.ok("reports.weekly.list", json!({}));
    assert_eq!(reports["reports"][0]["id"], json!("2024-W10"));

    // The plaintext password was upgraded on login and still works.
    sidecar.ok("auth.logout", json!({}));
    sidecar.ok(
        "auth.login",
        json!({ "identifier": "Old Admin", "password": "Legacy#2024" }),
    );

    // Once accounts exist only administrators may import.
    sidecar.ok("auth.logout", json!({}));
    assert_eq!(
        sidecar.err_code("import.legacyStorage", json!({ "entries": {} })),
        "forbidden"
    );

    sidecar.shutdown();
    let _ = std::fs::remove_dir_all(workspace);
}
