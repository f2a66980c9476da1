use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_date, get_opt_str, get_required_date, get_required_str, parse_time, require_role,
    today, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{Role, Session};
use chrono::Duration;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use std::collections::BTreeMap;
use uuid::Uuid;

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_opt_str(params, "groupId");
    let start = get_opt_date(params, "startDate")?.unwrap_or_else(today);
    let end = get_opt_date(params, "endDate")?.unwrap_or(start + Duration::days(6));

    let mut sql = String::from(
        "SELECT s.id, d.name, s.lesson_date, s.lesson_time, s.classroom,
                s.lesson_type, g.group_code, u.full_name
         FROM schedule s
         JOIN disciplines d ON s.discipline_id = d.id
         JOIN student_groups g ON s.group_id = g.id
         JOIN users u ON s.teacher_id = u.id
         WHERE s.lesson_date BETWEEN ? AND ?",
    );
    let mut bind: Vec<Value> = vec![Value::Text(start.to_string()), Value::Text(end.to_string())];
    if let Some(gid) = group_id {
        sql.push_str(" AND s.group_id = ?");
        bind.push(Value::Text(gid));
    }
    sql.push_str(" ORDER BY s.lesson_date, s.lesson_time, g.group_code");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok((
                r.get::<_, String>(2)?,
                json!({
                    "scheduleId": r.get::<_, String>(0)?,
                    "discipline": r.get::<_, String>(1)?,
                    "lessonTime": r.get::<_, String>(3)?,
                    "classroom": r.get::<_, Option<String>>(4)?,
                    "lessonType": r.get::<_, String>(5)?,
                    "groupCode": r.get::<_, String>(6)?,
                    "teacherName": r.get::<_, String>(7)?
                }),
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut by_day: BTreeMap<String, Vec<serde_json::Value>> = BTreeMap::new();
    for (day, lesson) in rows {
        by_day.entry(day).or_default().push(lesson);
    }
    let days: Vec<serde_json::Value> = by_day
        .into_iter()
        .map(|(date, lessons)| json!({ "date": date, "lessons": lessons }))
        .collect();

    Ok(json!({
        "startDate": start.to_string(),
        "endDate": end.to_string(),
        "days": days
    }))
}

fn exists(conn: &Connection, sql: &str, id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(sql, [id], |r| r.get::<_, i64>(0))
        .optional()
        .map(|v| v.is_some())
        .map_err(HandlerErr::db_query)
}

/// A group has at most one lesson per (date, time). The check and the insert
/// share one transaction, and the UNIQUE constraint backs them up.
fn add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let discipline_id = get_required_str(params, "disciplineId")?;
    let group_id = get_required_str(params, "groupId")?;
    let teacher_id = get_required_str(params, "teacherId")?;
    let lesson_date = get_required_date(params, "lessonDate")?;
    let lesson_time_raw = get_required_str(params, "lessonTime")?;
    let lesson_time = parse_time(&lesson_time_raw)?;
    let classroom = get_opt_str(params, "classroom");
    let lesson_type = get_required_str(params, "lessonType")?;

    if !exists(conn, "SELECT 1 FROM disciplines WHERE id = ?", &discipline_id)? {
        return Err(HandlerErr::not_found("discipline not found"));
    }
    if !exists(conn, "SELECT 1 FROM student_groups WHERE id = ?", &group_id)? {
        return Err(HandlerErr::not_found("group not found"));
    }
    if !exists(
        conn,
        "SELECT 1 FROM users WHERE id = ? AND role = 'Teacher'",
        &teacher_id,
    )? {
        return Err(HandlerErr::not_found("teacher not found"));
    }

    let date_str = lesson_date.to_string();
    let time_str = lesson_time.format("%H:%M").to_string();

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    let conflict = tx
        .query_row(
            "SELECT id FROM schedule
             WHERE group_id = ? AND lesson_date = ? AND lesson_time = ?",
            (&group_id, &date_str, &time_str),
            |r| r.get::<_, String>(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if conflict.is_some() {
        return Err(HandlerErr::new(
            "schedule_conflict",
            "the group already has a lesson at that time",
        ));
    }
    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO schedule(id, discipline_id, group_id, teacher_id,
                              lesson_date, lesson_time, classroom, lesson_type)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &discipline_id,
            &group_id,
            &teacher_id,
            &date_str,
            &time_str,
            &classroom,
            &lesson_type,
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "schedule"))?;
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "scheduleId": id }))
}

fn dispatch<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &Session, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let AppState { db, sessions, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let session = match require_role(sessions, &req.params, Role::Administrator) {
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
        "admin.listSchedule" => Some(dispatch(state, req, |c, _, p| list(c, p))),
        "admin.addSchedule" => Some(dispatch(state, req, |c, _, p| add(c, p))),
        _ => None,
    }
}
