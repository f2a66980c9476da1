use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{require_role, today, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::{Role, Session};
use crate::stats;
use chrono::Duration;
use rusqlite::Connection;
use serde_json::json;

fn entity_counts(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    conn.query_row(
        "SELECT
            (SELECT COUNT(*) FROM users WHERE role = 'Student'),
            (SELECT COUNT(*) FROM users WHERE role = 'Teacher'),
            (SELECT COUNT(*) FROM student_groups),
            (SELECT COUNT(*) FROM disciplines)",
        [],
        |r| {
            Ok(json!({
                "students": r.get::<_, i64>(0)?,
                "teachers": r.get::<_, i64>(1)?,
                "groups": r.get::<_, i64>(2)?,
                "disciplines": r.get::<_, i64>(3)?
            }))
        },
    )
    .map_err(HandlerErr::db_query)
}

fn dashboard(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let date = today().to_string();
    let mut stmt = conn
        .prepare(
            "SELECT s.id, d.name, s.lesson_time, s.classroom, s.lesson_type,
                    g.group_code, u.full_name
             FROM schedule s
             JOIN disciplines d ON s.discipline_id = d.id
             JOIN student_groups g ON s.group_id = g.id
             JOIN users u ON s.teacher_id = u.id
             WHERE s.lesson_date = ?
             ORDER BY s.lesson_time, g.group_code",
        )
        .map_err(HandlerErr::db_query)?;
    let lessons = stmt
        .query_map([&date], |r| {
            Ok(json!({
                "scheduleId": r.get::<_, String>(0)?,
                "discipline": r.get::<_, String>(1)?,
                "lessonTime": r.get::<_, String>(2)?,
                "classroom": r.get::<_, Option<String>>(3)?,
                "lessonType": r.get::<_, String>(4)?,
                "groupCode": r.get::<_, String>(5)?,
                "teacherName": r.get::<_, String>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "date": date,
        "todaySchedule": lessons,
        "counts": entity_counts(conn)?
    }))
}

fn percent_json(count: i64, total: i64) -> serde_json::Value {
    match stats::percent_share(count, total) {
        Some(p) => json!(p),
        None => serde_json::Value::Null,
    }
}

fn statistics(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let week_ago = (today() - Duration::days(7)).to_string();
    let month_ago = (today() - Duration::days(30)).to_string();

    let recent = conn
        .query_row(
            "SELECT
                (SELECT COUNT(*) FROM schedule WHERE lesson_date >= ?),
                (SELECT COUNT(DISTINCT student_id) FROM attendance WHERE marked_at >= ?)",
            (&week_ago, &week_ago),
            |r| {
                Ok(json!({
                    "classesLast7Days": r.get::<_, i64>(0)?,
                    "studentsMarkedLast7Days": r.get::<_, i64>(1)?
                }))
            },
        )
        .map_err(HandlerErr::db_query)?;

    // Status shares over the trailing 30 days, students only. Zero marks in
    // the window means the shares are null, never a division by zero.
    let (total, present, absent, excused, late) = conn
        .query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(a.status = 'present'), 0),
                    COALESCE(SUM(a.status = 'absent'), 0),
                    COALESCE(SUM(a.status = 'excused'), 0),
                    COALESCE(SUM(a.status = 'late'), 0)
             FROM attendance a
             JOIN users u ON a.student_id = u.id
             WHERE u.role = 'Student' AND a.marked_at >= ?",
            [&month_ago],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, i64>(2)?,
                    r.get::<_, i64>(3)?,
                    r.get::<_, i64>(4)?,
                ))
            },
        )
        .map_err(HandlerErr::db_query)?;
    if total != present + absent + excused + late {
        return Err(HandlerErr::new(
            "inconsistent_status",
            "attendance rows carry a status outside the four-value set",
        ));
    }
    let shares = json!({
        "total": total,
        "presentPercent": percent_json(present, total),
        "absentPercent": percent_json(absent, total),
        "excusedPercent": percent_json(excused, total),
        "latePercent": percent_json(late, total)
    });

    // Present-rate per group; ranking and rounding happen here, not in SQL.
    let mut stmt = conn
        .prepare(
            "SELECT g.group_code, COUNT(*), COALESCE(SUM(a.status = 'present'), 0)
             FROM attendance a
             JOIN schedule s ON a.schedule_id = s.id
             JOIN student_groups g ON s.group_id = g.id
             JOIN users u ON a.student_id = u.id
             WHERE u.role = 'Student' AND a.marked_at >= ?
             GROUP BY g.id, g.group_code",
        )
        .map_err(HandlerErr::db_query)?;
    let mut group_rates: Vec<(String, i64, f64)> = stmt
        .query_map([&month_ago], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, i64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?
        .into_iter()
        .filter_map(|(code, total, present)| {
            stats::percent_share(present, total).map(|rate| (code, total, rate))
        })
        .collect();
    group_rates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));
    group_rates.truncate(5);
    let top_groups: Vec<serde_json::Value> = group_rates
        .into_iter()
        .map(|(code, total, rate)| {
            json!({ "groupCode": code, "totalMarks": total, "presentRate": rate })
        })
        .collect();

    let mut stmt = conn
        .prepare(
            "SELECT a.id, u.full_name, d.name, a.status, a.marked_at, g.group_code
             FROM attendance a
             JOIN users u ON a.student_id = u.id
             JOIN schedule s ON a.schedule_id = s.id
             JOIN disciplines d ON s.discipline_id = d.id
             JOIN student_groups g ON s.group_id = g.id
             WHERE u.role = 'Student'
             ORDER BY a.marked_at DESC
             LIMIT 10",
        )
        .map_err(HandlerErr::db_query)?;
    let recent_marks = stmt
        .query_map([], |r| {
            Ok(json!({
                "attendanceId": r.get::<_, String>(0)?,
                "studentName": r.get::<_, String>(1)?,
                "discipline": r.get::<_, String>(2)?,
                "status": r.get::<_, String>(3)?,
                "markedAt": r.get::<_, String>(4)?,
                "groupCode": r.get::<_, String>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({
        "counts": entity_counts(conn)?,
        "recent": recent,
        "statusShares": shares,
        "topGroups": top_groups,
        "recentMarks": recent_marks
    }))
}

fn dispatch<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &Session) -> Result<serde_json::Value, HandlerErr>,
{
    let AppState { db, sessions, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session = match require_role(sessions, &req.params, Role::Administrator) {
        Ok(s) => s,
        Err(error) => return error.response(&req.id),
    };
    match f(conn, &session) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "admin.dashboard" => Some(dispatch(state, req, |c, _| dashboard(c))),
        "admin.statistics" => Some(dispatch(state, req, |c, _| statistics(c))),
        _ => None,
    }
}
