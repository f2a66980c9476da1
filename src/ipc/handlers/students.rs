use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_date, require_role, today, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::{Role, Session};
use crate::stats::{self, StatusCounts};
use chrono::{Duration, NaiveDate};
use rusqlite::Connection;
use serde_json::json;
use std::collections::BTreeMap;

/// Per-status counts for one student over an inclusive date range, checked
/// against the total so an out-of-enum status surfaces instead of being
/// silently dropped.
pub(crate) fn status_counts(
    conn: &Connection,
    student_id: &str,
    start: NaiveDate,
    end: NaiveDate,
) -> Result<StatusCounts, HandlerErr> {
    let counts = conn
        .query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(a.status = 'present'), 0),
                    COALESCE(SUM(a.status = 'absent'), 0),
                    COALESCE(SUM(a.status = 'excused'), 0),
                    COALESCE(SUM(a.status = 'late'), 0)
             FROM attendance a
             JOIN schedule s ON a.schedule_id = s.id
             WHERE a.student_id = ? AND s.lesson_date BETWEEN ? AND ?",
            (student_id, start.to_string(), end.to_string()),
            |r| {
                Ok(StatusCounts {
                    total: r.get(0)?,
                    present: r.get(1)?,
                    absent: r.get(2)?,
                    excused: r.get(3)?,
                    late: r.get(4)?,
                })
            },
        )
        .map_err(HandlerErr::db_query)?;
    if !counts.is_consistent() {
        return Err(HandlerErr::new(
            "inconsistent_status",
            "attendance rows carry a status outside the four-value set",
        ));
    }
    Ok(counts)
}

fn counts_json(c: &StatusCounts) -> serde_json::Value {
    json!({
        "total": c.total,
        "present": c.present,
        "absent": c.absent,
        "excused": c.excused,
        "late": c.late
    })
}

fn today_lessons_for_group(
    conn: &Connection,
    group_id: &str,
    date: NaiveDate,
) -> Result<Vec<serde_json::Value>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT s.id, d.name, s.lesson_time, s.classroom, s.lesson_type,
                    u.full_name, s.lesson_date
             FROM schedule s
             JOIN disciplines d ON s.discipline_id = d.id
             JOIN users u ON s.teacher_id = u.id
             WHERE s.group_id = ? AND s.lesson_date = ?
             ORDER BY s.lesson_time",
        )
        .map_err(HandlerErr::db_query)?;
    stmt.query_map((group_id, date.to_string()), |r| {
        Ok(json!({
            "scheduleId": r.get::<_, String>(0)?,
            "discipline": r.get::<_, String>(1)?,
            "lessonTime": r.get::<_, String>(2)?,
            "classroom": r.get::<_, Option<String>>(3)?,
            "lessonType": r.get::<_, String>(4)?,
            "teacherName": r.get::<_, String>(5)?,
            "lessonDate": r.get::<_, String>(6)?
        }))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::db_query)
}

fn group_code(conn: &Connection, group_id: &str) -> Result<Option<String>, HandlerErr> {
    use rusqlite::OptionalExtension;
    conn.query_row(
        "SELECT group_code FROM student_groups WHERE id = ?",
        [group_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(HandlerErr::db_query)
}

fn dashboard(conn: &Connection, session: &Session) -> Result<serde_json::Value, HandlerErr> {
    let date = today();
    let (start, end) = stats::default_range(date);
    let counts = status_counts(conn, &session.user_id, start, end)?;

    // A student with no group still gets a dashboard; the group-scoped
    // panels are empty rather than queried with a NULL filter.
    let Some(group_id) = session.group_id.as_deref() else {
        return Ok(json!({
            "inGroup": false,
            "groupCode": null,
            "todaySchedule": [],
            "disciplines": [],
            "stats": counts_json(&counts)
        }));
    };

    let lessons = today_lessons_for_group(conn, group_id, date)?;

    let mut stmt = conn
        .prepare(
            "SELECT d.name, d.total_hours, gd.semester
             FROM group_disciplines gd
             JOIN disciplines d ON gd.discipline_id = d.id
             WHERE gd.group_id = ?
             ORDER BY d.name",
        )
        .map_err(HandlerErr::db_query)?;
    let disciplines = stmt
        .query_map([group_id], |r| {
            Ok(json!({
                "name": r.get::<_, String>(0)?,
                "totalHours": r.get::<_, i64>(1)?,
                "semester": r.get::<_, i64>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "inGroup": true,
        "groupCode": group_code(conn, group_id)?,
        "todaySchedule": lessons,
        "disciplines": disciplines,
        "stats": counts_json(&counts)
    }))
}

fn week_schedule(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let Some(group_id) = session.group_id.as_deref() else {
        return Err(HandlerErr::new("not_in_group", "student has no group"));
    };
    let week_offset = params.get("weekOffset").and_then(|v| v.as_i64()).unwrap_or(0);
    let target = today() + Duration::weeks(week_offset);
    let (start, end) = stats::week_bounds(target);

    let mut stmt = conn
        .prepare(
            "SELECT s.id, d.name, s.lesson_date, s.lesson_time, s.classroom,
                    s.lesson_type, u.full_name
             FROM schedule s
             JOIN disciplines d ON s.discipline_id = d.id
             JOIN users u ON s.teacher_id = u.id
             WHERE s.group_id = ? AND s.lesson_date BETWEEN ? AND ?
             ORDER BY s.lesson_date, s.lesson_time",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map((group_id, start.to_string(), end.to_string()), |r| {
            Ok((
                r.get::<_, String>(2)?,
                json!({
                    "scheduleId": r.get::<_, String>(0)?,
                    "discipline": r.get::<_, String>(1)?,
                    "lessonTime": r.get::<_, String>(3)?,
                    "classroom": r.get::<_, Option<String>>(4)?,
                    "lessonType": r.get::<_, String>(5)?,
                    "teacherName": r.get::<_, String>(6)?
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    // BTreeMap keeps the days in date order.
    let mut by_day: BTreeMap<String, Vec<serde_json::Value>> = BTreeMap::new();
    for (day, lesson) in rows {
        by_day.entry(day).or_default().push(lesson);
    }
    let days: Vec<serde_json::Value> = by_day
        .into_iter()
        .map(|(date, lessons)| json!({ "date": date, "lessons": lessons }))
        .collect();

    Ok(json!({
        "groupCode": group_code(conn, group_id)?,
        "startOfWeek": start.to_string(),
        "endOfWeek": end.to_string(),
        "weekOffset": week_offset,
        "days": days
    }))
}

fn attendance_history(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let (default_start, default_end) = stats::default_range(today());
    let start = get_opt_date(params, "startDate")?.unwrap_or(default_start);
    let end = get_opt_date(params, "endDate")?.unwrap_or(default_end);

    let mut stmt = conn
        .prepare(
            "SELECT a.id, d.name, s.lesson_date, s.lesson_time, a.status, a.notes,
                    u.full_name, s.classroom
             FROM attendance a
             JOIN schedule s ON a.schedule_id = s.id
             JOIN disciplines d ON s.discipline_id = d.id
             JOIN users u ON s.teacher_id = u.id
             WHERE a.student_id = ? AND s.lesson_date BETWEEN ? AND ?
             ORDER BY s.lesson_date DESC, s.lesson_time DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let records = stmt
        .query_map((&session.user_id, start.to_string(), end.to_string()), |r| {
            Ok(json!({
                "attendanceId": r.get::<_, String>(0)?,
                "discipline": r.get::<_, String>(1)?,
                "lessonDate": r.get::<_, String>(2)?,
                "lessonTime": r.get::<_, String>(3)?,
                "status": r.get::<_, String>(4)?,
                "notes": r.get::<_, Option<String>>(5)?,
                "teacherName": r.get::<_, String>(6)?,
                "classroom": r.get::<_, Option<String>>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "startDate": start.to_string(),
        "endDate": end.to_string(),
        "records": records
    }))
}

fn disciplines(conn: &Connection, session: &Session) -> Result<serde_json::Value, HandlerErr> {
    let Some(group_id) = session.group_id.as_deref() else {
        return Err(HandlerErr::new("not_in_group", "student has no group"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT d.id, d.name, d.description, d.total_hours, gd.semester,
                    u.full_name,
                    (SELECT COUNT(*) FROM attendance a
                     JOIN schedule s ON a.schedule_id = s.id
                     WHERE s.discipline_id = d.id AND a.student_id = ?) AS attended
             FROM group_disciplines gd
             JOIN disciplines d ON gd.discipline_id = d.id
             JOIN users u ON d.teacher_id = u.id
             WHERE gd.group_id = ?
             ORDER BY d.name",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map((&session.user_id, group_id), |r| {
            Ok(json!({
                "disciplineId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "totalHours": r.get::<_, i64>(3)?,
                "semester": r.get::<_, i64>(4)?,
                "teacherName": r.get::<_, String>(5)?,
                "attendedClasses": r.get::<_, i64>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "disciplines": rows }))
}

fn dispatch<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &Session, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let AppState { db, sessions, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session = match require_role(sessions, &req.params, Role::Student) {
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
        "student.dashboard" => Some(dispatch(state, req, |c, s, _| dashboard(c, s))),
        "student.weekSchedule" => Some(dispatch(state, req, week_schedule)),
        "student.attendance" => Some(dispatch(state, req, attendance_history)),
        "student.disciplines" => Some(dispatch(state, req, |c, s, _| disciplines(c, s))),
        _ => None,
    }
}
