use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_date, get_opt_str, get_required_str, require_role, today, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::{Role, Session};
use crate::stats::{self, AttendanceStatus};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

/// Schedule entries are markable only by the teacher who teaches them.
fn owned_lesson_group(
    conn: &Connection,
    schedule_id: &str,
    teacher_id: &str,
) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT group_id FROM schedule WHERE id = ? AND teacher_id = ?",
        (schedule_id, teacher_id),
        |r| r.get(0),
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("lesson not found or not yours"))
}

fn today_classes(conn: &Connection, session: &Session) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, d.name, s.lesson_time, g.group_code, s.classroom, s.lesson_type
             FROM schedule s
             JOIN disciplines d ON s.discipline_id = d.id
             JOIN student_groups g ON s.group_id = g.id
             WHERE s.teacher_id = ? AND s.lesson_date = ?
             ORDER BY s.lesson_time",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map((&session.user_id, today().to_string()), |r| {
            Ok(json!({
                "scheduleId": r.get::<_, String>(0)?,
                "discipline": r.get::<_, String>(1)?,
                "lessonTime": r.get::<_, String>(2)?,
                "groupCode": r.get::<_, String>(3)?,
                "classroom": r.get::<_, Option<String>>(4)?,
                "lessonType": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "date": today().to_string(), "classes": rows }))
}

/// Roster for one lesson: every student of the lesson's group with their
/// current mark, `unmarked` when no record exists yet.
fn class_roster(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let schedule_id = get_required_str(params, "scheduleId")?;

    let lesson = conn
        .query_row(
            "SELECT s.id, d.name, s.lesson_date, s.lesson_time, g.group_code,
                    s.classroom, s.lesson_type, g.id
             FROM schedule s
             JOIN disciplines d ON s.discipline_id = d.id
             JOIN student_groups g ON s.group_id = g.id
             WHERE s.id = ? AND s.teacher_id = ?",
            (&schedule_id, &session.user_id),
            |r| {
                Ok((
                    json!({
                        "scheduleId": r.get::<_, String>(0)?,
                        "discipline": r.get::<_, String>(1)?,
                        "lessonDate": r.get::<_, String>(2)?,
                        "lessonTime": r.get::<_, String>(3)?,
                        "groupCode": r.get::<_, String>(4)?,
                        "classroom": r.get::<_, Option<String>>(5)?,
                        "lessonType": r.get::<_, String>(6)?
                    }),
                    r.get::<_, String>(7)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some((class_info, group_id)) = lesson else {
        return Err(HandlerErr::not_found("lesson not found or not yours"));
    };

    let mut marks: HashMap<String, (String, Option<String>)> = HashMap::new();
    let mut stmt = conn
        .prepare("SELECT student_id, status, notes FROM attendance WHERE schedule_id = ?")
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([&schedule_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, Option<String>>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    for (student_id, status, notes) in rows {
        marks.insert(student_id, (status, notes));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, full_name, login, email
             FROM users
             WHERE role = 'Student' AND group_id = ?
             ORDER BY full_name",
        )
        .map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map([&group_id], |r| {
            let id: String = r.get(0)?;
            let (status, notes) = marks
                .get(&id)
                .cloned()
                .unwrap_or(("unmarked".to_string(), None));
            Ok(json!({
                "studentId": id,
                "fullName": r.get::<_, String>(1)?,
                "login": r.get::<_, String>(2)?,
                "email": r.get::<_, Option<String>>(3)?,
                "status": status,
                "notes": notes
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "classInfo": class_info, "students": students }))
}

/// Idempotent upsert keyed by (student, lesson): re-marking replaces
/// status/notes/marker/timestamp, never duplicates.
fn mark(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let schedule_id = get_required_str(params, "scheduleId")?;
    let student_id = get_required_str(params, "studentId")?;
    let status_str = get_required_str(params, "status")?;
    let notes = get_opt_str(params, "notes");

    let status = AttendanceStatus::parse(&status_str)
        .ok_or_else(|| HandlerErr::validation(format!("unknown status: {}", status_str)))?;
    owned_lesson_group(conn, &schedule_id, &session.user_id)?;

    let student_exists = conn
        .query_row(
            "SELECT 1 FROM users WHERE id = ? AND role = 'Student'",
            [&student_id],
            |r| r.get::<_, i64>(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !student_exists {
        return Err(HandlerErr::not_found("student not found"));
    }

    conn.execute(
        "INSERT INTO attendance(id, student_id, schedule_id, status, notes, marked_by, marked_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(student_id, schedule_id) DO UPDATE SET
           status = excluded.status,
           notes = excluded.notes,
           marked_by = excluded.marked_by,
           marked_at = excluded.marked_at",
        (
            Uuid::new_v4().to_string(),
            &student_id,
            &schedule_id,
            status.as_str(),
            &notes,
            &session.user_id,
            Utc::now().to_rfc3339(),
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "attendance"))?;

    Ok(json!({ "ok": true }))
}

/// Per-student per-discipline counts over the teacher's own lessons.
/// Optional group/student filters are appended to the SQL only when present.
fn statistics(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_opt_str(params, "groupId");
    let student_id = get_opt_str(params, "studentId");
    let (default_start, default_end) = stats::default_range(today());
    let start = get_opt_date(params, "startDate")?.unwrap_or(default_start);
    let end = get_opt_date(params, "endDate")?.unwrap_or(default_end);

    let mut stmt = conn
        .prepare(
            "SELECT DISTINCT g.id, g.group_code
             FROM schedule s
             JOIN student_groups g ON s.group_id = g.id
             WHERE s.teacher_id = ?
             ORDER BY g.group_code",
        )
        .map_err(HandlerErr::db_query)?;
    let groups = stmt
        .query_map([&session.user_id], |r| {
            Ok(json!({
                "groupId": r.get::<_, String>(0)?,
                "groupCode": r.get::<_, String>(1)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let students = match group_id.as_deref() {
        Some(gid) => {
            let mut stmt = conn
                .prepare(
                    "SELECT id, full_name FROM users
                     WHERE role = 'Student' AND group_id = ?
                     ORDER BY full_name",
                )
                .map_err(HandlerErr::db_query)?;
            stmt.query_map([gid], |r| {
                Ok(json!({
                    "studentId": r.get::<_, String>(0)?,
                    "fullName": r.get::<_, String>(1)?
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?
        }
        None => Vec::new(),
    };

    let rows = if group_id.is_some() || student_id.is_some() {
        let mut sql = String::from(
            "SELECT u.id, u.full_name, d.name,
                    COUNT(*),
                    COALESCE(SUM(a.status = 'present'), 0),
                    COALESCE(SUM(a.status = 'absent'), 0),
                    COALESCE(SUM(a.status = 'excused'), 0),
                    COALESCE(SUM(a.status = 'late'), 0)
             FROM attendance a
             JOIN schedule s ON a.schedule_id = s.id
             JOIN disciplines d ON s.discipline_id = d.id
             JOIN users u ON a.student_id = u.id
             WHERE s.teacher_id = ?
               AND u.role = 'Student'
               AND s.lesson_date BETWEEN ? AND ?",
        );
        let mut bind: Vec<Value> = vec![
            Value::Text(session.user_id.clone()),
            Value::Text(start.to_string()),
            Value::Text(end.to_string()),
        ];
        if let Some(sid) = &student_id {
            sql.push_str(" AND a.student_id = ?");
            bind.push(Value::Text(sid.clone()));
        } else if let Some(gid) = &group_id {
            sql.push_str(" AND s.group_id = ?");
            bind.push(Value::Text(gid.clone()));
        }
        sql.push_str(" GROUP BY u.id, u.full_name, d.name ORDER BY u.full_name, d.name");

        let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
        let collected = stmt
            .query_map(params_from_iter(bind), |r| {
                Ok(json!({
                    "studentId": r.get::<_, String>(0)?,
                    "studentName": r.get::<_, String>(1)?,
                    "discipline": r.get::<_, String>(2)?,
                    "total": r.get::<_, i64>(3)?,
                    "present": r.get::<_, i64>(4)?,
                    "absent": r.get::<_, i64>(5)?,
                    "excused": r.get::<_, i64>(6)?,
                    "late": r.get::<_, i64>(7)?
                }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(HandlerErr::db_query)?;
        Some(collected)
    } else {
        None
    };

    Ok(json!({
        "groups": groups,
        "students": students,
        "statistics": rows,
        "startDate": start.to_string(),
        "endDate": end.to_string()
    }))
}

fn dispatch<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &Session, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let AppState { db, sessions, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session = match require_role(sessions, &req.params, Role::Teacher) {
        Ok(s) => s,
        Err(error) => return error.response(&req.id),
    };
    match f(conn, &session, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "teacher.todayClasses" => Some(dispatch(state, req, |c, s, _| today_classes(c, s))),
        "teacher.classRoster" => Some(dispatch(state, req, class_roster)),
        "teacher.markAttendance" => Some(dispatch(state, req, mark)),
        "teacher.statistics" => Some(dispatch(state, req, statistics)),
        _ => None,
    }
}
