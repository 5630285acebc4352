use crate::model::{Permission, User, UserRole};
use crate::security;

pub fn role_permissions(role: UserRole) -> &'static [Permission] {
    use Permission::*;
    match role {
        UserRole::Admin | UserRole::Teacher => &[
            ViewAll,
            EditAll,
            EditAttendance,
            EditStudents,
            EditSettings,
            ApproveAttendance,
            ViewReports,
        ],
        UserRole::SubjectTeacher => &[ViewAll, EditAttendance, CheckAttendance, ViewReports],
        UserRole::StudentMonitor => &[CheckAttendance],
    }
}

pub fn has_permission(user: Option<&User>, permission: Permission) -> bool {
    user.map(|u| role_permissions(u.role).contains(&permission))
        .unwrap_or(false)
}

pub fn has_any_permission(user: Option<&User>, permissions: &[Permission]) -> bool {
    permissions.iter().any(|p| has_permission(user, *p))
}

pub fn can_edit_attendance(user: Option<&User>) -> bool {
    has_any_permission(user, &[Permission::EditAttendance, Permission::EditAll])
}

pub fn can_edit_students(user: Option<&User>) -> bool {
    has_any_permission(user, &[Permission::EditStudents, Permission::EditAll])
}

pub fn can_edit_settings(user: Option<&User>) -> bool {
    has_any_permission(user, &[Permission::EditSettings, Permission::EditAll])
}

pub fn can_approve_attendance(user: Option<&User>) -> bool {
    has_permission(user, Permission::ApproveAttendance)
}

pub fn can_check_attendance(user: Option<&User>) -> bool {
    has_permission(user, Permission::CheckAttendance)
}

pub fn can_view_reports(user: Option<&User>) -> bool {
    has_permission(user, Permission::ViewReports)
}

/// Homeroom view of a class. A teacher with an assigned class sees only
/// that class; admins and unassigned teachers see all of them.
pub fn can_access_class(user: Option<&User>, grade: u8, class_num: u8) -> bool {
    let Some(user) = user else {
        return false;
    };
    match user.role {
        UserRole::Admin => true,
        UserRole::Teacher => match (user.grade, user.class_num) {
            (Some(g), Some(c)) => g == grade && c == class_num,
            _ => true,
        },
        UserRole::SubjectTeacher | UserRole::StudentMonitor => false,
    }
}

/// Direct attendance writes. Subject teachers teach across classes, so they
/// may write any class without homeroom access.
pub fn can_write_class_attendance(user: Option<&User>, grade: u8, class_num: u8) -> bool {
    if !can_edit_attendance(user) {
        return false;
    }
    matches!(user.map(|u| u.role), Some(UserRole::SubjectTeacher))
        || can_access_class(user, grade, class_num)
}

/// Find the account matching `identifier` (email or name, trimmed,
/// case-insensitive) whose stored hash accepts `password`.
pub fn authenticate<'a>(users: &'a [User], identifier: &str, password: &str) -> Option<&'a User> {
    let needle = identifier.trim().to_lowercase();
    if needle.is_empty() || password.is_empty() {
        return None;
    }
    let user = users.iter().find(|u| {
        u.email
            .as_deref()
            .map(|e| e.trim().to_lowercase() == needle)
            .unwrap_or(false)
            || u.name.trim().to_lowercase() == needle
    })?;
    let stored = user.password_hash.as_deref().filter(|h| !h.is_empty())?;
    if security::verify_password(password, stored) {
        Some(user)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: &str, role: UserRole) -> User {
        User {
            id: id.to_string(),
            name: format!("User {}", id),
            email: None,
            role,
            grade: None,
            class_num: None,
            subject: None,
            student_id: None,
            password_hash: None,
            created_at: "2024-03-01 09:00:00".to_string(),
            last_login: None,
        }
    }

    #[test]
    fn role_table() {
        let admin = user("a", UserRole::Admin);
        let subject = user("s", UserRole::SubjectTeacher);
        let monitor = user("m", UserRole::StudentMonitor);

        assert!(can_approve_attendance(Some(&admin)));
        assert!(can_edit_settings(Some(&admin)));
        assert!(can_view_reports(Some(&subject)));
        assert!(can_edit_attendance(Some(&subject)));
        assert!(!can_edit_students(Some(&subject)));
        assert!(!can_approve_attendance(Some(&subject)));
        assert!(can_check_attendance(Some(&monitor)));
        assert!(!can_edit_attendance(Some(&monitor)));
        assert!(!can_view_reports(None));
    }

    #[test]
    fn homeroom_teachers_are_limited_to_their_class() {
        let mut t = user("t", UserRole::Teacher);
        assert!(can_access_class(Some(&t), 2, 4));
        t.grade = Some(1);
        t.class_num = Some(3);
        assert!(can_access_class(Some(&t), 1, 3));
        assert!(!can_access_class(Some(&t), 1, 4));
        assert!(!can_write_class_attendance(Some(&t), 2, 3));

        let s = user("s", UserRole::SubjectTeacher);
        assert!(!can_access_class(Some(&s), 1, 1));
        assert!(can_write_class_attendance(Some(&s), 3, 6));
        let m = user("m", UserRole::StudentMonitor);
        assert!(!can_write_class_attendance(Some(&m), 1, 1));
    }

    #[test]
    fn login_by_email_or_name() {
        let mut kim = user("k", UserRole::Teacher);
        kim.name = "Kim Minji".to_string();
        kim.email = Some("Kim@School.kr".to_string());
        kim.password_hash = Some(security::hash_password("Winter2024!"));
        let mut lee = user("l", UserRole::Admin);
        lee.name = "Lee".to_string();
        lee.password_hash = Some("Spring2024!".to_string());
        let users = vec![kim, lee];

        assert_eq!(authenticate(&users, " kim@school.kr ", "Winter2024!").map(|u| u.id.as_str()), Some("k"));
        assert_eq!(authenticate(&users, "KIM MINJI", "Winter2024!").map(|u| u.id.as_str()), Some("k"));
        assert!(authenticate(&users, "kim@school.kr", "wrong").is_none());
        assert_eq!(authenticate(&users, "lee", "Spring2024!").map(|u| u.id.as_str()), Some("l"));
        assert!(authenticate(&users, "", "Spring2024!").is_none());
        assert!(authenticate(&users, "nobody", "Spring2024!").is_none());
    }
}
