mod common;

use common::{temp_dir, Sidecar};
use serde_json::{json, Value};

fn april_stats(sidecar: &mut Sidecar) -> Value {
    sidecar.ok(
        "stats.students",
        json!({ "startDate": "2024-04-01", "endDate": "2024-04-30", "grade": 1 }),
    )
}

#[test]
fn sessions_partition_archive_and_restore_attendance() {
    let workspace = temp_dir("attendanced-sessions");
    let mut sidecar = Sidecar::spawn();
    sidecar.open_as_admin(&workspace);
    let kim = sidecar.add_student(1, 1, 1, "Kim");

    let first = sidecar.ok("sessions.create", json!({ "year": 2024, "type": "1학기" }));
    assert_eq!(first["session"]["id"], json!("2024-first_semester"));
    assert_eq!(first["session"]["startDate"], json!("2024-03-01"));
    assert_eq!(first["replaced"], json!(false));

    let saved = sidecar.ok(
        "sessions.config.save",
        json!({
            "config": {
                "semester": "first_semester",
                "dayPeriodRanges": [
                    { "date": "2024-04-10", "startPeriod": 1, "endPeriod": 8 }
                ]
            }
        }),
    );
    assert_eq!(saved["sessionId"], json!("2024-first_semester"));
    assert_eq!(
        sidecar.err_code(
            "sessions.config.save",
            json!({ "config": { "dayPeriodRanges": [ { "date": "2024-04-11", "startPeriod": 5, "endPeriod": 2 } ] } })
        ),
        "bad_params"
    );

    let day = sidecar.ok(
        "attendance.dayOpen",
        json!({ "grade": 1, "class": 1, "date": "2024-04-10" }),
    );
    assert_eq!(day["sessionId"], json!("2024-first_semester"));
    assert_eq!(day["visiblePeriods"].as_array().map(|p| p.len()), Some(8));

    sidecar.ok(
        "attendance.bulkSetAllPeriods",
        json!({ "grade": 1, "class": 1, "date": "2024-04-10", "status": "present" }),
    );
    sidecar.ok(
        "attendance.setStatus",
        json!({ "studentId": kim, "date": "2024-04-10", "period": 8, "status": "absent" }),
    );

    let stats = april_stats(&mut sidecar);
    assert_eq!(stats["totalPeriods"], json!(8));
    assert_eq!(stats["stats"][0]["stats"]["present"], json!(7));
    assert_eq!(stats["stats"][0]["stats"]["absent"], json!(1));
    assert_eq!(stats["stats"][0]["stats"]["attendanceRate"], json!(87.5));
    assert_eq!(
        stats["overall"],
        json!({ "totalStudents": 1, "avgAttendanceRate": 87.5, "totalAbsent": 1, "totalLate": 0 })
    );

    let second = sidecar.ok("sessions.create", json!({ "year": 2024, "type": "second_semester" }));
    assert_eq!(second["archivedSessionId"], json!("2024-first_semester"));
    let listed = sidecar.ok("sessions.list", json!({}));
    assert_eq!(listed["activeSessionId"], json!("2024-second_semester"));

    let stats = april_stats(&mut sidecar);
    assert_eq!(stats["sessionId"], json!("2024-second_semester"));
    assert_eq!(stats["stats"][0]["stats"]["present"], json!(0));
    assert_eq!(stats["overall"]["avgAttendanceRate"], json!(0.0));
    assert_eq!(stats["overall"]["totalAbsent"], json!(0));

    assert_eq!(
        sidecar.err_code("sessions.switch", json!({ "id": "1999-first_semester" })),
        "not_found"
    );
    let switched = sidecar.ok("sessions.switch", json!({ "id": "2024-first_semester" }));
    assert_eq!(switched["archivedSessionId"], json!("2024-second_semester"));
    assert_eq!(switched["restorableRecordCount"], json!(8));

    // Switching alone does not bring the archived data back.
    let stats = april_stats(&mut sidecar);
    assert_eq!(stats["stats"][0]["stats"]["present"], json!(0));

    let restored = sidecar.ok("sessions.restore", json!({ "id": "2024-first_semester" }));
    assert_eq!(restored["restoredRecords"], json!(8));
    assert_eq!(restored["config"]["dayPeriodRanges"][0]["endPeriod"], json!(8));

    let stats = april_stats(&mut sidecar);
    assert_eq!(stats["totalPeriods"], json!(8));
    assert_eq!(stats["stats"][0]["stats"]["present"], json!(7));

    sidecar.ok("sessions.delete", json!({ "id": "2024-second_semester" }));
    let listed = sidecar.ok("sessions.list", json!({}));
    assert_eq!(listed["sessions"].as_array().map(|s| s.len()), Some(1));
    assert_eq!(
        sidecar.err_code("sessions.delete", json!({ "id": "2024-second_semester" })),
        "not_found"
    );

    sidecar.shutdown();
    let _ = std::fs::remove_dir_all(workspace);
}
