mod common;

use common::{temp_dir, Sidecar, ADMIN_PASSWORD};
use serde_json::json;

#[test]
fn monitor_submissions_wait_for_teacher_approval() {
    let workspace = temp_dir("attendanced-pending");
    let mut sidecar = Sidecar::spawn();
    sidecar.open_as_admin(&workspace);
    let kim = sidecar.add_student(2, 3, 1, "Kim");
    sidecar.ok(
        "users.create",
        json!({ "name": "Monitor", "role": "student_monitor", "grade": 2, "class": 3, "password": "Monitor#23" }),
    );
    sidecar.ok("auth.logout", json!({}));
    sidecar.ok(
        "auth.login",
        json!({ "identifier": "Monitor", "password": "Monitor#23" }),
    );

    assert_eq!(
        sidecar.err_code(
            "attendance.setStatus",
            json!({ "studentId": kim, "date": "2024-05-08", "period": 1, "status": "absent" })
        ),
        "forbidden"
    );
    assert_eq!(
        sidecar.err_code(
            "pending.create",
            json!({ "studentId": "9-9-9", "date": "2024-05-08", "period": 1, "status": "absent" })
        ),
        "not_found"
    );
    let first = sidecar.ok(
        "pending.create",
        json!({ "studentId": kim, "date": "2024-05-08", "period": 1, "status": "absent", "note": "fever" }),
    );
    let first_id = first["pending"]["id"].as_str().expect("id").to_string();
    let second = sidecar.ok(
        "pending.create",
        json!({ "studentId": kim, "date": "2024-05-08", "period": 2, "status": "late" }),
    );
    let second_id = second["pending"]["id"].as_str().expect("id").to_string();

    assert_eq!(sidecar.ok("pending.count", json!({}))["count"], json!(2));
    assert_eq!(
        sidecar.err_code("pending.approve", json!({ "id": first_id })),
        "forbidden"
    );

    sidecar.ok("auth.logout", json!({}));
    sidecar.ok(
        "auth.login",
        json!({ "identifier": "Principal", "password": ADMIN_PASSWORD }),
    );

    let day = sidecar.ok(
        "attendance.dayOpen",
        json!({ "grade": 2, "class": 3, "date": "2024-05-08" }),
    );
    assert_eq!(day["students"][0]["pendingCount"], json!(2));

    let approved = sidecar.ok("pending.approve", json!({ "id": first_id }));
    assert_eq!(approved["record"]["status"], json!("absent"));
    assert_eq!(approved["record"]["note"], json!("fever"));
    assert!(approved["pending"]["approvedBy"].is_string());
    assert_eq!(
        sidecar.err_code("pending.approve", json!({ "id": first_id })),
        "conflict"
    );

    sidecar.ok("pending.reject", json!({ "id": second_id }));
    assert_eq!(
        sidecar.err_code("pending.approve", json!({ "id": second_id })),
        "conflict"
    );
    assert_eq!(sidecar.ok("pending.count", json!({}))["count"], json!(0));
    let history = sidecar.ok("pending.list", json!({ "includeDecided": true }));
    assert_eq!(history["pending"].as_array().map(|a| a.len()), Some(2));

    let day = sidecar.ok(
        "attendance.dayOpen",
        json!({ "grade": 2, "class": 3, "date": "2024-05-08" }),
    );
    let cells = day["students"][0]["cells"].as_array().expect("cells");
    assert_eq!(cells[0]["status"], json!("absent"));
    assert_eq!(cells[1]["status"], json!(null), "rejected entries write nothing");

    sidecar.shutdown();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn repeated_submissions_for_one_cell_are_kept_apart() {
    let workspace = temp_dir("attendanced-pending-repeat");
    let mut sidecar = Sidecar::spawn();
    sidecar.open_as_admin(&workspace);
    let park = sidecar.add_student(1, 4, 7, "Park");
    sidecar.ok(
        "users.create",
        json!({ "name": "Choi", "role": "subject_teacher", "subject": "Science", "password": "Science#14" }),
    );
    sidecar.ok("auth.logout", json!({}));
    sidecar.ok(
        "auth.login",
        json!({ "identifier": "Choi", "password": "Science#14" }),
    );

    let ids: Vec<String> = ["absent", "late", "sick"]
        .iter()
        .map(|status| {
            let created = sidecar.ok(
                "pending.create",
                json!({ "studentId": park, "date": "2024-06-03", "period": 3, "status": status }),
            );
            created["pending"]["id"].as_str().expect("id").to_string()
        })
        .collect();

    assert_ne!(ids[0], ids[1]);
    assert_ne!(ids[1], ids[2]);
    assert_ne!(ids[0], ids[2]);
    assert_eq!(sidecar.ok("pending.count", json!({}))["count"], json!(3));

    sidecar.shutdown();
    let _ = std::fs::remove_dir_all(workspace);
}
