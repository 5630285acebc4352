use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::Context;
use chrono::NaiveDate;
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::calendar;
use crate::schedule::{self, ResolvedDay};
use crate::model::{
    format_date, AttendanceConfig, AttendanceRecord, AttendanceStatus, PendingAttendance,
    PeriodSchedule, SemesterKind, SemesterSchedule, Session, Student, User, UserRole,
};

pub const DB_FILE: &str = "attendance.sqlite3";
pub const GLOBAL_PERIOD_SCHEDULES_KEY: &str = "calendar.periodSchedules";

/// Partition used for records written while no session exists.
pub const NO_SESSION: &str = "";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            grade INTEGER NOT NULL,
            class_num INTEGER NOT NULL,
            number INTEGER NOT NULL,
            is_home_school INTEGER NOT NULL DEFAULT 0,
            home_school_start TEXT,
            home_school_end TEXT,
            is_home_return INTEGER NOT NULL DEFAULT 0,
            home_return_start_period INTEGER,
            updated_at TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(grade, class_num, number)",
        [],
    )?;
    ensure_students_friendship_class(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS sessions(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            year INTEGER NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            archived_at TEXT
        )",
        [],
    )?;

    for table in ["attendance_records", "archived_attendance_records"] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}(
                    session_id TEXT NOT NULL DEFAULT '',
                    id TEXT NOT NULL,
                    student_id TEXT NOT NULL,
                    date TEXT NOT NULL,
                    period INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    note TEXT,
                    PRIMARY KEY(session_id, id)
                )",
                table
            ),
            [],
        )?;
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{0}_date ON {0}(session_id, date)",
                table
            ),
            [],
        )?;
    }

    for table in ["attendance_configs", "archived_attendance_configs"] {
        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {}(
                    session_id TEXT PRIMARY KEY,
                    config_json TEXT NOT NULL
                )",
                table
            ),
            [],
        )?;
    }

    conn.execute(
        "CREATE TABLE IF NOT EXISTS semester_schedules(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            year INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS holidays(
            date TEXT PRIMARY KEY,
            name TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            email TEXT,
            role TEXT NOT NULL,
            grade INTEGER,
            class_num INTEGER,
            subject TEXT,
            student_id TEXT,
            password_hash TEXT,
            created_at TEXT NOT NULL,
            last_login TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pending_attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            date TEXT NOT NULL,
            period INTEGER NOT NULL,
            status TEXT NOT NULL,
            checked_by TEXT NOT NULL,
            checked_at TEXT NOT NULL,
            approved_by TEXT,
            approved_at TEXT,
            rejected_by TEXT,
            rejected_at TEXT,
            note TEXT
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pending_checked_by ON pending_attendance(checked_by)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS weekly_reports(
            id TEXT PRIMARY KEY,
            week_start TEXT NOT NULL,
            week_end TEXT NOT NULL,
            generated_at TEXT NOT NULL,
            report_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(conn)
}

fn ensure_students_friendship_class(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "students", "is_friendship_class")? {
        return Ok(());
    }
    conn.execute(
        "ALTER TABLE students ADD COLUMN is_friendship_class INTEGER NOT NULL DEFAULT 0",
        [],
    )?;
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

// --- settings ---

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("settings value for {}", key))?,
        )),
        None => Ok(None),
    }
}

pub fn settings_set_json(conn: &Connection, key: &str, value: &serde_json::Value) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, serde_json::to_string(value)?),
    )?;
    Ok(())
}

// --- column helpers ---

fn conversion_err(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let s: String = row.get(idx)?;
    crate::model::parse_date(&s).ok_or_else(|| conversion_err(idx, format!("bad date: {}", s)))
}

fn opt_date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    let s: Option<String> = row.get(idx)?;
    Ok(s.and_then(|v| crate::model::parse_date(&v)))
}

fn status_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<AttendanceStatus> {
    let s: String = row.get(idx)?;
    AttendanceStatus::parse(&s).ok_or_else(|| conversion_err(idx, format!("bad status: {}", s)))
}

fn kind_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<SemesterKind> {
    let s: String = row.get(idx)?;
    SemesterKind::parse(&s).ok_or_else(|| conversion_err(idx, format!("bad semester type: {}", s)))
}

// --- students ---

const STUDENT_COLS: &str = "id, name, grade, class_num, number, is_home_school, home_school_start,
    home_school_end, is_home_return, home_return_start_period, is_friendship_class";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    Ok(Student {
        id: r.get(0)?,
        name: r.get(1)?,
        grade: r.get(2)?,
        class_num: r.get(3)?,
        number: r.get(4)?,
        is_home_school: r.get::<_, i64>(5)? != 0,
        home_school_start_date: opt_date_col(r, 6)?,
        home_school_end_date: opt_date_col(r, 7)?,
        is_home_return: r.get::<_, i64>(8)? != 0,
        home_return_start_period: r.get(9)?,
        is_friendship_class: r.get::<_, i64>(10)? != 0,
    })
}

pub fn list_students(conn: &Connection) -> anyhow::Result<Vec<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM students ORDER BY grade, class_num, number, id",
        STUDENT_COLS
    ))?;
    let rows = stmt
        .query_map([], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_class_students(conn: &Connection, grade: u8, class_num: u8) -> anyhow::Result<Vec<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM students WHERE grade = ? AND class_num = ? ORDER BY number, id",
        STUDENT_COLS
    ))?;
    let rows = stmt
        .query_map((grade, class_num), student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_student(conn: &Connection, id: &str) -> anyhow::Result<Option<Student>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLS),
            [id],
            student_from_row,
        )
        .optional()?)
}

pub fn upsert_student(conn: &Connection, s: &Student) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO students(id, name, grade, class_num, number, is_home_school, home_school_start,
            home_school_end, is_home_return, home_return_start_period, is_friendship_class, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            grade = excluded.grade,
            class_num = excluded.class_num,
            number = excluded.number,
            is_home_school = excluded.is_home_school,
            home_school_start = excluded.home_school_start,
            home_school_end = excluded.home_school_end,
            is_home_return = excluded.is_home_return,
            home_return_start_period = excluded.home_return_start_period,
            is_friendship_class = excluded.is_friendship_class,
            updated_at = excluded.updated_at",
        params![
            s.id,
            s.name,
            s.grade,
            s.class_num,
            s.number,
            s.is_home_school as i64,
            s.home_school_start_date.map(format_date),
            s.home_school_end_date.map(format_date),
            s.is_home_return as i64,
            s.home_return_start_period,
            s.is_friendship_class as i64,
            crate::model::now_timestamp(),
        ],
    )?;
    Ok(())
}

pub fn delete_student(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM students WHERE id = ?", [id])?;
    Ok(n > 0)
}

// --- sessions ---

const SESSION_COLS: &str =
    "id, name, kind, start_date, end_date, year, is_active, created_at, archived_at";

fn session_from_row(r: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: r.get(0)?,
        name: r.get(1)?,
        kind: kind_col(r, 2)?,
        start_date: date_col(r, 3)?,
        end_date: date_col(r, 4)?,
        year: r.get(5)?,
        is_active: r.get::<_, i64>(6)? != 0,
        created_at: r.get(7)?,
        archived_at: r.get(8)?,
    })
}

/// Active session first, then newest year, then term order.
pub fn list_sessions(conn: &Connection) -> anyhow::Result<Vec<Session>> {
    let mut stmt = conn.prepare(&format!("SELECT {} FROM sessions", SESSION_COLS))?;
    let mut rows = stmt
        .query_map([], session_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.sort_by(|a, b| {
        b.is_active
            .cmp(&a.is_active)
            .then_with(|| b.year.cmp(&a.year))
            .then_with(|| a.kind.order().cmp(&b.kind.order()))
    });
    Ok(rows)
}

pub fn get_session(conn: &Connection, id: &str) -> anyhow::Result<Option<Session>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM sessions WHERE id = ?", SESSION_COLS),
            [id],
            session_from_row,
        )
        .optional()?)
}

pub fn active_session(conn: &Connection) -> anyhow::Result<Option<Session>> {
    Ok(conn
        .query_row(
            &format!(
                "SELECT {} FROM sessions WHERE is_active = 1 ORDER BY year DESC LIMIT 1",
                SESSION_COLS
            ),
            [],
            session_from_row,
        )
        .optional()?)
}

pub fn upsert_session(conn: &Connection, s: &Session) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO sessions(id, name, kind, start_date, end_date, year, is_active, created_at, archived_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            kind = excluded.kind,
            start_date = excluded.start_date,
            end_date = excluded.end_date,
            year = excluded.year,
            is_active = excluded.is_active,
            archived_at = excluded.archived_at",
        params![
            s.id,
            s.name,
            s.kind.as_str(),
            format_date(s.start_date),
            format_date(s.end_date),
            s.year,
            s.is_active as i64,
            s.created_at,
            s.archived_at,
        ],
    )?;
    Ok(())
}

pub fn mark_session_archived(conn: &Connection, id: &str, at: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE sessions SET is_active = 0, archived_at = ? WHERE id = ?",
        (at, id),
    )?;
    Ok(())
}

pub fn activate_only(conn: &Connection, id: &str) -> anyhow::Result<()> {
    conn.execute(
        "UPDATE sessions SET is_active = CASE WHEN id = ? THEN 1 ELSE 0 END",
        [id],
    )?;
    Ok(())
}

/// Move a session's live records and config into the archive tables.
pub fn archive_session_data(conn: &Connection, session_id: &str) -> anyhow::Result<usize> {
    let moved = conn.execute(
        "INSERT OR REPLACE INTO archived_attendance_records(session_id, id, student_id, date, period, status, note)
         SELECT session_id, id, student_id, date, period, status, note
         FROM attendance_records WHERE session_id = ?",
        [session_id],
    )?;
    conn.execute(
        "DELETE FROM attendance_records WHERE session_id = ?",
        [session_id],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO archived_attendance_configs(session_id, config_json)
         SELECT session_id, config_json FROM attendance_configs WHERE session_id = ?",
        [session_id],
    )?;
    conn.execute(
        "DELETE FROM attendance_configs WHERE session_id = ?",
        [session_id],
    )?;
    Ok(moved)
}

/// Copy archived records and config back into the live tables and clear the archive.
pub fn restore_session_data(conn: &Connection, session_id: &str) -> anyhow::Result<usize> {
    let restored = conn.execute(
        "INSERT OR REPLACE INTO attendance_records(session_id, id, student_id, date, period, status, note)
         SELECT session_id, id, student_id, date, period, status, note
         FROM archived_attendance_records WHERE session_id = ?",
        [session_id],
    )?;
    conn.execute(
        "DELETE FROM archived_attendance_records WHERE session_id = ?",
        [session_id],
    )?;
    conn.execute(
        "INSERT OR REPLACE INTO attendance_configs(session_id, config_json)
         SELECT session_id, config_json FROM archived_attendance_configs WHERE session_id = ?",
        [session_id],
    )?;
    conn.execute(
        "DELETE FROM archived_attendance_configs WHERE session_id = ?",
        [session_id],
    )?;
    Ok(restored)
}

pub fn delete_session(conn: &Connection, session_id: &str) -> anyhow::Result<bool> {
    for table in [
        "attendance_records",
        "archived_attendance_records",
        "attendance_configs",
        "archived_attendance_configs",
    ] {
        conn.execute(
            &format!("DELETE FROM {} WHERE session_id = ?", table),
            [session_id],
        )?;
    }
    let n = conn.execute("DELETE FROM sessions WHERE id = ?", [session_id])?;
    Ok(n > 0)
}

/// Partition a date's records belong to: the active session, else the
/// session whose range contains the date, else the sessionless partition.
pub fn resolve_session_id(sessions: &[Session], date: NaiveDate) -> String {
    sessions
        .iter()
        .find(|s| s.is_active)
        .or_else(|| sessions.iter().find(|s| s.contains(date)))
        .map(|s| s.id.clone())
        .unwrap_or_else(|| NO_SESSION.to_string())
}

pub fn session_id_for_date(conn: &Connection, date: NaiveDate) -> anyhow::Result<String> {
    Ok(resolve_session_id(&list_sessions(conn)?, date))
}

// --- attendance configs ---

pub fn get_config(conn: &Connection, session_id: &str) -> anyhow::Result<Option<AttendanceConfig>> {
    get_config_from(conn, "attendance_configs", session_id)
}

pub fn get_archived_config(conn: &Connection, session_id: &str) -> anyhow::Result<Option<AttendanceConfig>> {
    get_config_from(conn, "archived_attendance_configs", session_id)
}

fn get_config_from(conn: &Connection, table: &str, session_id: &str) -> anyhow::Result<Option<AttendanceConfig>> {
    let raw: Option<String> = conn
        .query_row(
            &format!("SELECT config_json FROM {} WHERE session_id = ?", table),
            [session_id],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(
            serde_json::from_str(&s).with_context(|| format!("attendance config for {:?}", session_id))?,
        )),
        None => Ok(None),
    }
}

pub fn save_config(conn: &Connection, session_id: &str, config: &AttendanceConfig) -> anyhow::Result<()> {
    save_config_into(conn, "attendance_configs", session_id, config)
}

pub fn save_archived_config(conn: &Connection, session_id: &str, config: &AttendanceConfig) -> anyhow::Result<()> {
    save_config_into(conn, "archived_attendance_configs", session_id, config)
}

fn save_config_into(
    conn: &Connection,
    table: &str,
    session_id: &str,
    config: &AttendanceConfig,
) -> anyhow::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {}(session_id, config_json) VALUES(?, ?)
             ON CONFLICT(session_id) DO UPDATE SET config_json = excluded.config_json",
            table
        ),
        (session_id, serde_json::to_string(config)?),
    )?;
    Ok(())
}

// --- calendar ---

pub fn list_semesters(conn: &Connection) -> anyhow::Result<Vec<SemesterSchedule>> {
    let mut stmt =
        conn.prepare("SELECT id, name, kind, start_date, end_date, year FROM semester_schedules")?;
    let mut rows = stmt
        .query_map([], |r| {
            Ok(SemesterSchedule {
                id: r.get(0)?,
                name: r.get(1)?,
                kind: kind_col(r, 2)?,
                start_date: date_col(r, 3)?,
                end_date: date_col(r, 4)?,
                year: r.get(5)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    calendar::sort_semesters(&mut rows);
    Ok(rows)
}

/// Replace the whole semester table.
pub fn replace_semesters(conn: &Connection, semesters: &[SemesterSchedule]) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM semester_schedules", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT OR REPLACE INTO semester_schedules(id, name, kind, start_date, end_date, year)
             VALUES(?, ?, ?, ?, ?, ?)",
        )?;
        for s in semesters {
            stmt.execute(params![
                s.id,
                s.name,
                s.kind.as_str(),
                format_date(s.start_date),
                format_date(s.end_date),
                s.year
            ])?;
        }
    }
    tx.commit()?;
    Ok(())
}

pub fn list_holidays(conn: &Connection) -> anyhow::Result<Vec<(NaiveDate, Option<String>)>> {
    let mut stmt = conn.prepare("SELECT date, name FROM holidays ORDER BY date")?;
    let rows = stmt
        .query_map([], |r| Ok((date_col(r, 0)?, r.get::<_, Option<String>>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn holiday_dates(conn: &Connection) -> anyhow::Result<Vec<NaiveDate>> {
    Ok(list_holidays(conn)?.into_iter().map(|(d, _)| d).collect())
}

pub fn replace_holidays(conn: &Connection, holidays: &[(NaiveDate, Option<String>)]) -> anyhow::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM holidays", [])?;
    insert_holidays(&tx, holidays)?;
    tx.commit()?;
    Ok(())
}

/// Add holidays, keeping any existing names. Returns the number of new dates.
pub fn insert_holidays(conn: &Connection, holidays: &[(NaiveDate, Option<String>)]) -> anyhow::Result<usize> {
    let mut stmt = conn.prepare("INSERT OR IGNORE INTO holidays(date, name) VALUES(?, ?)")?;
    let mut added = 0;
    for (d, name) in holidays {
        added += stmt.execute((format_date(*d), name))?;
    }
    Ok(added)
}

pub fn global_period_schedules(conn: &Connection) -> anyhow::Result<Vec<PeriodSchedule>> {
    match settings_get_json(conn, GLOBAL_PERIOD_SCHEDULES_KEY)? {
        Some(v) => Ok(serde_json::from_value(v).context("global period schedules")?),
        None => Ok(Vec::new()),
    }
}

pub fn save_global_period_schedules(conn: &Connection, schedules: &[PeriodSchedule]) -> anyhow::Result<()> {
    settings_set_json(conn, GLOBAL_PERIOD_SCHEDULES_KEY, &serde_json::to_value(schedules)?)
}

/// Semesters used for day-type lookup: the saved calendar, else session ranges.
pub fn effective_semesters(conn: &Connection) -> anyhow::Result<Vec<SemesterSchedule>> {
    let saved = list_semesters(conn)?;
    if !saved.is_empty() {
        return Ok(saved);
    }
    Ok(list_sessions(conn)?.iter().map(Session::as_semester).collect())
}

/// Schedule for `date` together with the session partition it belongs to.
pub fn resolve_day_for(conn: &Connection, date: NaiveDate) -> anyhow::Result<(String, ResolvedDay)> {
    let session_id = session_id_for_date(conn, date)?;
    let config = get_config(conn, &session_id)?;
    let semesters = effective_semesters(conn)?;
    let holidays = holiday_dates(conn)?;
    let global = global_period_schedules(conn)?;
    let day = schedule::resolve_day(date, &semesters, &holidays, &global, config.as_ref());
    Ok((session_id, day))
}

// --- attendance records ---

fn record_from_row(r: &Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let session_id: String = r.get(0)?;
    Ok(AttendanceRecord {
        session_id: if session_id.is_empty() { None } else { Some(session_id) },
        id: r.get(1)?,
        student_id: r.get(2)?,
        date: date_col(r, 3)?,
        period: r.get(4)?,
        status: status_col(r, 5)?,
        note: r.get(6)?,
    })
}

pub fn session_records_between(
    conn: &Connection,
    session_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT session_id, id, student_id, date, period, status, note
         FROM attendance_records
         WHERE session_id = ? AND date >= ? AND date <= ?
         ORDER BY date, student_id, period",
    )?;
    let rows = stmt
        .query_map(
            (session_id, format_date(start), format_date(end)),
            record_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn archived_records(conn: &Connection, session_id: &str) -> anyhow::Result<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT session_id, id, student_id, date, period, status, note
         FROM archived_attendance_records
         WHERE session_id = ?
         ORDER BY date, student_id, period",
    )?;
    let rows = stmt
        .query_map([session_id], record_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Records dated in `[start, end]`, each day read from the partition the
/// attendance book would use for it.
pub fn records_for_range(
    conn: &Connection,
    start: NaiveDate,
    end: NaiveDate,
) -> anyhow::Result<Vec<AttendanceRecord>> {
    let sessions = list_sessions(conn)?;
    let mut day_partition: BTreeMap<NaiveDate, String> = BTreeMap::new();
    for day in calendar::days_inclusive(start, end) {
        day_partition.insert(day, resolve_session_id(&sessions, day));
    }
    let partitions: BTreeSet<&String> = day_partition.values().collect();
    let mut out = Vec::new();
    for sid in partitions {
        for r in session_records_between(conn, sid, start, end)? {
            if day_partition.get(&r.date) == Some(sid) {
                out.push(r);
            }
        }
    }
    out.sort_by(|a, b| {
        a.date
            .cmp(&b.date)
            .then_with(|| a.student_id.cmp(&b.student_id))
            .then_with(|| a.period.cmp(&b.period))
    });
    Ok(out)
}

pub fn upsert_record(conn: &Connection, session_id: &str, r: &AttendanceRecord) -> anyhow::Result<()> {
    upsert_record_into(conn, "attendance_records", session_id, r)
}

pub fn upsert_archived_record(conn: &Connection, session_id: &str, r: &AttendanceRecord) -> anyhow::Result<()> {
    upsert_record_into(conn, "archived_attendance_records", session_id, r)
}

fn upsert_record_into(
    conn: &Connection,
    table: &str,
    session_id: &str,
    r: &AttendanceRecord,
) -> anyhow::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO {}(session_id, id, student_id, date, period, status, note)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id, id) DO UPDATE SET
                status = excluded.status,
                note = excluded.note",
            table
        ),
        params![
            session_id,
            r.id,
            r.student_id,
            format_date(r.date),
            r.period,
            r.status.as_str(),
            r.note,
        ],
    )?;
    Ok(())
}

pub fn delete_record(conn: &Connection, session_id: &str, record_id: &str) -> anyhow::Result<bool> {
    let n = conn.execute(
        "DELETE FROM attendance_records WHERE session_id = ? AND id = ?",
        (session_id, record_id),
    )?;
    Ok(n > 0)
}

/// Remove one day's records for the given students, optionally one period only.
pub fn delete_day_records(
    conn: &Connection,
    session_id: &str,
    student_ids: &[String],
    date: NaiveDate,
    period: Option<u8>,
) -> anyhow::Result<usize> {
    let mut stmt = conn.prepare(
        "DELETE FROM attendance_records
         WHERE session_id = ? AND student_id = ? AND date = ? AND (?4 IS NULL OR period = ?4)",
    )?;
    let day = format_date(date);
    let mut removed = 0;
    for sid in student_ids {
        removed += stmt.execute(params![session_id, sid, day, period])?;
    }
    Ok(removed)
}

// --- users ---

const USER_COLS: &str = "id, name, email, role, grade, class_num, subject, student_id,
    password_hash, created_at, last_login";

fn user_from_row(r: &Row<'_>) -> rusqlite::Result<User> {
    let role: String = r.get(3)?;
    Ok(User {
        id: r.get(0)?,
        name: r.get(1)?,
        email: r.get(2)?,
        role: UserRole::parse(&role).ok_or_else(|| conversion_err(3, format!("bad role: {}", role)))?,
        grade: r.get(4)?,
        class_num: r.get(5)?,
        subject: r.get(6)?,
        student_id: r.get(7)?,
        password_hash: r.get(8)?,
        created_at: r.get(9)?,
        last_login: r.get(10)?,
    })
}

pub fn list_users(conn: &Connection) -> anyhow::Result<Vec<User>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users ORDER BY created_at, id",
        USER_COLS
    ))?;
    let rows = stmt
        .query_map([], user_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_user(conn: &Connection, id: &str) -> anyhow::Result<Option<User>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM users WHERE id = ?", USER_COLS),
            [id],
            user_from_row,
        )
        .optional()?)
}

pub fn count_users(conn: &Connection) -> anyhow::Result<i64> {
    Ok(conn.query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))?)
}

pub fn upsert_user(conn: &Connection, u: &User) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO users(id, name, email, role, grade, class_num, subject, student_id,
            password_hash, created_at, last_login)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            email = excluded.email,
            role = excluded.role,
            grade = excluded.grade,
            class_num = excluded.class_num,
            subject = excluded.subject,
            student_id = excluded.student_id,
            password_hash = excluded.password_hash,
            last_login = excluded.last_login",
        params![
            u.id,
            u.name,
            u.email,
            u.role.as_str(),
            u.grade,
            u.class_num,
            u.subject,
            u.student_id,
            u.password_hash,
            u.created_at,
            u.last_login,
        ],
    )?;
    Ok(())
}

pub fn delete_user(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM users WHERE id = ?", [id])?;
    Ok(n > 0)
}

// --- pending attendance ---

const PENDING_COLS: &str = "id, student_id, date, period, status, checked_by, checked_at,
    approved_by, approved_at, rejected_by, rejected_at, note";

fn pending_from_row(r: &Row<'_>) -> rusqlite::Result<PendingAttendance> {
    Ok(PendingAttendance {
        id: r.get(0)?,
        student_id: r.get(1)?,
        date: date_col(r, 2)?,
        period: r.get(3)?,
        status: status_col(r, 4)?,
        checked_by: r.get(5)?,
        checked_at: r.get(6)?,
        approved_by: r.get(7)?,
        approved_at: r.get(8)?,
        rejected_by: r.get(9)?,
        rejected_at: r.get(10)?,
        note: r.get(11)?,
    })
}

/// Undecided entries, optionally only those submitted by `checked_by`.
pub fn list_open_pending(conn: &Connection, checked_by: Option<&str>) -> anyhow::Result<Vec<PendingAttendance>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM pending_attendance
         WHERE approved_by IS NULL AND rejected_by IS NULL
           AND (?1 IS NULL OR checked_by = ?1)
         ORDER BY checked_at, id",
        PENDING_COLS
    ))?;
    let rows = stmt
        .query_map([checked_by], pending_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_all_pending(conn: &Connection) -> anyhow::Result<Vec<PendingAttendance>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM pending_attendance ORDER BY checked_at, id",
        PENDING_COLS
    ))?;
    let rows = stmt
        .query_map([], pending_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_pending(conn: &Connection, id: &str) -> anyhow::Result<Option<PendingAttendance>> {
    Ok(conn
        .query_row(
            &format!("SELECT {} FROM pending_attendance WHERE id = ?", PENDING_COLS),
            [id],
            pending_from_row,
        )
        .optional()?)
}

pub fn upsert_pending(conn: &Connection, p: &PendingAttendance) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO pending_attendance(id, student_id, date, period, status, checked_by, checked_at,
            approved_by, approved_at, rejected_by, rejected_at, note)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            status = excluded.status,
            approved_by = excluded.approved_by,
            approved_at = excluded.approved_at,
            rejected_by = excluded.rejected_by,
            rejected_at = excluded.rejected_at,
            note = excluded.note",
        params![
            p.id,
            p.student_id,
            format_date(p.date),
            p.period,
            p.status.as_str(),
            p.checked_by,
            p.checked_at,
            p.approved_by,
            p.approved_at,
            p.rejected_by,
            p.rejected_at,
            p.note,
        ],
    )?;
    Ok(())
}

// --- weekly reports ---

pub struct ReportRow {
    pub id: String,
    pub week_start: String,
    pub week_end: String,
    pub generated_at: String,
}

pub fn save_report(
    conn: &Connection,
    id: &str,
    week_start: NaiveDate,
    week_end: NaiveDate,
    generated_at: &str,
    report: &serde_json::Value,
) -> anyhow::Result<()> {
    conn.execute(
        "INSERT INTO weekly_reports(id, week_start, week_end, generated_at, report_json)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            week_start = excluded.week_start,
            week_end = excluded.week_end,
            generated_at = excluded.generated_at,
            report_json = excluded.report_json",
        params![
            id,
            format_date(week_start),
            format_date(week_end),
            generated_at,
            serde_json::to_string(report)?,
        ],
    )?;
    Ok(())
}

/// Newest week first.
pub fn list_reports(conn: &Connection) -> anyhow::Result<Vec<ReportRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, week_start, week_end, generated_at FROM weekly_reports ORDER BY week_start DESC, id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(ReportRow {
                id: r.get(0)?,
                week_start: r.get(1)?,
                week_end: r.get(2)?,
                generated_at: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_report(conn: &Connection, id: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT report_json FROM weekly_reports WHERE id = ?",
            [id],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s).context("stored report")?)),
        None => Ok(None),
    }
}

pub fn delete_report(conn: &Connection, id: &str) -> anyhow::Result<bool> {
    let n = conn.execute("DELETE FROM weekly_reports WHERE id = ?", [id])?;
    Ok(n > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").expect("date")
    }

    fn session(year: i32, kind: SemesterKind, start: &str, end: &str, active: bool) -> Session {
        Session {
            id: Session::session_id(year, kind),
            name: format!("{} {}", year, kind.display_name()),
            kind,
            start_date: d(start),
            end_date: d(end),
            year,
            is_active: active,
            created_at: "2024-03-01 08:00:00".to_string(),
            archived_at: None,
        }
    }

    #[test]
    fn active_session_wins_over_date_range() {
        let sessions = vec![
            session(2024, SemesterKind::FirstSemester, "2024-03-01", "2024-06-30", false),
            session(2024, SemesterKind::SecondSemester, "2024-09-01", "2024-12-31", true),
        ];
        assert_eq!(resolve_session_id(&sessions, d("2024-04-01")), "2024-second_semester");
    }

    #[test]
    fn date_range_then_sessionless() {
        let sessions = vec![session(
            2024,
            SemesterKind::FirstSemester,
            "2024-03-01",
            "2024-06-30",
            false,
        )];
        assert_eq!(resolve_session_id(&sessions, d("2024-04-01")), "2024-first_semester");
        assert_eq!(resolve_session_id(&sessions, d("2024-08-01")), NO_SESSION);
        assert_eq!(resolve_session_id(&[], d("2024-08-01")), NO_SESSION);
    }
}
