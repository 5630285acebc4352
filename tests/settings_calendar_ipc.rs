mod common;

use common::{temp_dir, Sidecar};
use serde_json::json;

#[test]
fn settings_sections_have_defaults_and_validated_patches() {
    let workspace = temp_dir("attendanced-settings");
    let mut sidecar = Sidecar::spawn();
    sidecar.open_as_admin(&workspace);

    let settings = sidecar.ok("settings.get", json!({}));
    assert_eq!(settings["attendance"]["lowerGradeMaxPeriod"], json!(11));
    assert_eq!(settings["attendance"]["nightStudyStartPeriod"], json!(8));
    assert!(settings["reports"]["healthKeywords"].is_array());

    let updated = sidecar.ok(
        "settings.update",
        json!({ "section": "attendance", "patch": { "lowerGradeMaxPeriod": 10 } }),
    );
    assert_eq!(updated["values"]["lowerGradeMaxPeriod"], json!(10));
    assert_eq!(updated["values"]["nightStudyStartPeriod"], json!(8));

    assert_eq!(
        sidecar.err_code(
            "settings.update",
            json!({ "section": "attendance", "patch": { "nightStudyStartPeriod": 13 } })
        ),
        "bad_params"
    );
    assert_eq!(
        sidecar.err_code(
            "settings.update",
            json!({ "section": "appearance", "patch": {} })
        ),
        "bad_params"
    );

    let reports = sidecar.ok(
        "settings.update",
        json!({ "section": "reports", "patch": { "healthKeywords": ["보건실", " ", "clinic"] } }),
    );
    assert_eq!(reports["values"]["healthKeywords"], json!(["보건실", "clinic"]));

    let day = sidecar.ok("calendar.dayType", json!({ "date": "2024-04-10", "grade": 1 }));
    assert_eq!(day["visiblePeriods"].as_array().map(|p| p.len()), Some(10));

    sidecar.shutdown();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn calendar_drives_day_types_and_schedules() {
    let workspace = temp_dir("attendanced-calendar");
    let mut sidecar = Sidecar::spawn();
    sidecar.open_as_admin(&workspace);

    let seeded = sidecar.ok("calendar.semesters.seedDefaults", json!({ "year": 2024 }));
    assert_eq!(seeded["added"], json!(4));
    let again = sidecar.ok("calendar.semesters.seedDefaults", json!({ "year": 2024 }));
    assert_eq!(again["added"], json!(0));

    let imported = sidecar.ok("calendar.holidays.importKorean", json!({ "startYear": 2024 }));
    assert_eq!(imported["total"], json!(9), "includes the Children's Day substitute");
    assert_eq!(imported["added"], json!(9));
    let again = sidecar.ok("calendar.holidays.importKorean", json!({ "startYear": 2024 }));
    assert_eq!(again["added"], json!(0));

    let kinds = [
        ("2024-04-10", "weekday"),
        ("2024-04-13", "weekend"),
        ("2024-05-06", "holiday"),
        ("2024-07-15", "vacation"),
        ("2024-07-20", "weekend"),
    ];
    for (date, expected) in kinds {
        let day = sidecar.ok("calendar.dayType", json!({ "date": date }));
        assert_eq!(day["dayType"], json!(expected), "{}", date);
    }

    assert_eq!(
        sidecar.err_code(
            "calendar.periodSchedules.save",
            json!({ "periodSchedules": [ {
                "dayType": "vacation",
                "periods": [
                    { "period": 1, "startTime": "09:00", "endTime": "09:50" },
                    { "period": 1, "startTime": "10:00", "endTime": "10:50" }
                ]
            } ] })
        ),
        "bad_params"
    );
    sidecar.ok(
        "calendar.periodSchedules.save",
        json!({ "periodSchedules": [ {
            "dayType": "vacation",
            "periods": [
                { "period": 1, "startTime": "09:00", "endTime": "09:50" },
                { "period": 2, "startTime": "10:00", "endTime": "10:50" },
                { "period": 3, "startTime": "11:00", "endTime": "11:50" },
                { "period": 4, "startTime": "13:00", "endTime": "13:50" }
            ]
        } ] }),
    );
    let vacation = sidecar.ok("calendar.dayType", json!({ "date": "2024-07-15", "grade": 3 }));
    assert_eq!(vacation["schedule"]["source"], json!("global"));
    assert_eq!(vacation["visiblePeriods"].as_array().map(|p| p.len()), Some(4));
    assert_eq!(vacation["semester"]["type"], json!("summer_vacation"));

    let saved = sidecar.ok(
        "calendar.holidays.save",
        json!({ "holidays": [ { "date": "2024-04-12", "name": "Foundation Day" }, "2024-04-12" ] }),
    );
    assert_eq!(saved["holidays"], json!([ { "date": "2024-04-12", "name": "Foundation Day" } ]));
    let day = sidecar.ok("calendar.dayType", json!({ "date": "2024-05-06" }));
    assert_eq!(day["dayType"], json!("weekday"), "save replaces the holiday list");

    assert_eq!(
        sidecar.err_code(
            "calendar.semesters.save",
            json!({ "semesters": [ {
                "id": "bad", "name": "bad", "type": "first_semester",
                "startDate": "2024-06-01", "endDate": "2024-03-01", "year": 2024
            } ] })
        ),
        "bad_params"
    );

    sidecar.shutdown();
    let _ = std::fs::remove_dir_all(workspace);
}
