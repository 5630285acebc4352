use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const MIN_GRADE: u8 = 1;
pub const MAX_GRADE: u8 = 3;
pub const MIN_CLASS: u8 = 1;
pub const MAX_CLASS: u8 = 6;
pub const MAX_PERIOD: u8 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    EarlyLeave,
    Leave,
    Sick,
    HomeSchool,
    HomeReturn,
}

impl AttendanceStatus {
    pub const ALL: [AttendanceStatus; 8] = [
        AttendanceStatus::Present,
        AttendanceStatus::Absent,
        AttendanceStatus::Late,
        AttendanceStatus::EarlyLeave,
        AttendanceStatus::Leave,
        AttendanceStatus::Sick,
        AttendanceStatus::HomeSchool,
        AttendanceStatus::HomeReturn,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::EarlyLeave => "early_leave",
            AttendanceStatus::Leave => "leave",
            AttendanceStatus::Sick => "sick",
            AttendanceStatus::HomeSchool => "home_school",
            AttendanceStatus::HomeReturn => "home_return",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|v| v.as_str() == s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayType {
    Weekday,
    Weekend,
    Holiday,
    Vacation,
}

impl DayType {
    pub fn as_str(self) -> &'static str {
        match self {
            DayType::Weekday => "weekday",
            DayType::Weekend => "weekend",
            DayType::Holiday => "holiday",
            DayType::Vacation => "vacation",
        }
    }
}

/// Semester or vacation term. The Korean labels used by older exports are
/// accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SemesterKind {
    #[serde(alias = "1학기")]
    FirstSemester,
    #[serde(alias = "여름방학")]
    SummerVacation,
    #[serde(alias = "2학기")]
    SecondSemester,
    #[serde(alias = "겨울방학")]
    WinterVacation,
}

impl SemesterKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SemesterKind::FirstSemester => "first_semester",
            SemesterKind::SummerVacation => "summer_vacation",
            SemesterKind::SecondSemester => "second_semester",
            SemesterKind::WinterVacation => "winter_vacation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "first_semester" | "1학기" => Some(SemesterKind::FirstSemester),
            "summer_vacation" | "여름방학" => Some(SemesterKind::SummerVacation),
            "second_semester" | "2학기" => Some(SemesterKind::SecondSemester),
            "winter_vacation" | "겨울방학" => Some(SemesterKind::WinterVacation),
            _ => None,
        }
    }

    pub fn is_vacation(self) -> bool {
        matches!(
            self,
            SemesterKind::SummerVacation | SemesterKind::WinterVacation
        )
    }

    /// Position within a school year: 1st semester, summer, 2nd semester, winter.
    pub fn order(self) -> u8 {
        match self {
            SemesterKind::FirstSemester => 1,
            SemesterKind::SummerVacation => 2,
            SemesterKind::SecondSemester => 3,
            SemesterKind::WinterVacation => 4,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            SemesterKind::FirstSemester => "1st semester",
            SemesterKind::SummerVacation => "summer vacation",
            SemesterKind::SecondSemester => "2nd semester",
            SemesterKind::WinterVacation => "winter vacation",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    pub name: String,
    pub grade: u8,
    #[serde(rename = "class")]
    pub class_num: u8,
    pub number: u32,
    #[serde(default)]
    pub is_home_school: bool,
    #[serde(default)]
    pub home_school_start_date: Option<NaiveDate>,
    #[serde(default)]
    pub home_school_end_date: Option<NaiveDate>,
    #[serde(default)]
    pub is_home_return: bool,
    #[serde(default)]
    pub home_return_start_period: Option<u8>,
    #[serde(default)]
    pub is_friendship_class: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub date: NaiveDate,
    pub period: u8,
    pub status: AttendanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl AttendanceRecord {
    pub fn record_id(student_id: &str, date: NaiveDate, period: u8) -> String {
        format!("{}-{}-{}", student_id, date.format("%Y-%m-%d"), period)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub period: u8,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodSchedule {
    pub day_type: DayType,
    pub periods: Vec<Period>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_period: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DayPeriodRange {
    pub date: NaiveDate,
    pub start_period: u8,
    pub end_period: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterSchedule {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SemesterKind,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub year: i32,
}

impl SemesterSchedule {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: SemesterKind,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub year: i32,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived_at: Option<String>,
}

impl Session {
    pub fn session_id(year: i32, kind: SemesterKind) -> String {
        format!("{}-{}", year, kind.as_str())
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start_date <= date && date <= self.end_date
    }

    pub fn as_semester(&self) -> SemesterSchedule {
        SemesterSchedule {
            id: self.id.clone(),
            name: self.name.clone(),
            kind: self.kind,
            start_date: self.start_date,
            end_date: self.end_date,
            year: self.year,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semester: Option<SemesterKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<u8>,
    #[serde(default, rename = "class", skip_serializing_if = "Option::is_none")]
    pub class_num: Option<u8>,
    #[serde(default)]
    pub day_period_ranges: Vec<DayPeriodRange>,
    #[serde(default)]
    pub period_schedules: Vec<PeriodSchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_periods: Option<Vec<Period>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserRole {
    Admin,
    Teacher,
    SubjectTeacher,
    StudentMonitor,
}

impl UserRole {
    pub fn as_str(self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Teacher => "teacher",
            UserRole::SubjectTeacher => "subject_teacher",
            UserRole::StudentMonitor => "student_monitor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "admin" => Some(UserRole::Admin),
            "teacher" => Some(UserRole::Teacher),
            "subject_teacher" => Some(UserRole::SubjectTeacher),
            "student_monitor" => Some(UserRole::StudentMonitor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewAll,
    EditAll,
    EditAttendance,
    EditStudents,
    EditSettings,
    CheckAttendance,
    ApproveAttendance,
    ViewReports,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub role: UserRole,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<u8>,
    #[serde(default, rename = "class", skip_serializing_if = "Option::is_none")]
    pub class_num: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    #[serde(default, rename = "password", skip_serializing)]
    pub password_hash: Option<String>,
    #[serde(default)]
    pub created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAttendance {
    pub id: String,
    pub student_id: String,
    pub date: NaiveDate,
    pub period: u8,
    pub status: AttendanceStatus,
    pub checked_by: String,
    pub checked_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approved_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejected_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl PendingAttendance {
    pub fn is_decided(&self) -> bool {
        self.approved_by.is_some() || self.rejected_by.is_some()
    }
}

pub fn parse_date(s: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").ok()
}

pub fn format_date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

pub fn now_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
