use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_str, get_required_i64, get_required_str, require_role, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{Role, Session};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

struct GroupAssignment {
    group_id: String,
    semester: i64,
}

/// `params.groups` is `[{ groupId, semester }]`. Semesters outside [1,12]
/// are a validation failure before anything is written.
fn parse_group_assignments(
    params: &serde_json::Value,
    require_nonempty: bool,
) -> Result<Vec<GroupAssignment>, HandlerErr> {
    let Some(items) = params.get("groups").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing groups"));
    };
    if require_nonempty && items.is_empty() {
        return Err(HandlerErr::validation("at least one group is required"));
    }
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let group_id = item
            .get("groupId")
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params("groups[].groupId must be a string"))?;
        let semester = item
            .get("semester")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| HandlerErr::validation("every group needs a semester"))?;
        if !(1..=12).contains(&semester) {
            return Err(HandlerErr::validation("semester must be between 1 and 12"));
        }
        out.push(GroupAssignment {
            group_id: group_id.to_string(),
            semester,
        });
    }
    Ok(out)
}

fn require_positive_hours(params: &serde_json::Value) -> Result<i64, HandlerErr> {
    let hours = get_required_i64(params, "totalHours")?;
    if hours <= 0 {
        return Err(HandlerErr::validation("total hours must be positive"));
    }
    Ok(hours)
}

/// Ownership gate: a discipline is editable only by its teacher. Missing and
/// foreign-owned disciplines are indistinguishable to the caller.
fn owned_discipline(
    conn: &Connection,
    discipline_id: &str,
    teacher_id: &str,
) -> Result<String, HandlerErr> {
    conn.query_row(
        "SELECT name FROM disciplines WHERE id = ? AND teacher_id = ?",
        (discipline_id, teacher_id),
        |r| r.get(0),
    )
    .optional()
    .map_err(HandlerErr::db_query)?
    .ok_or_else(|| HandlerErr::not_found("discipline not found or not yours"))
}

fn group_exists(conn: &Connection, group_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row(
        "SELECT 1 FROM student_groups WHERE id = ?",
        [group_id],
        |r| r.get::<_, i64>(0),
    )
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db_query)
}

fn list_owned(conn: &Connection, session: &Session) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT d.id, d.name, d.description, d.total_hours,
                    COALESCE(GROUP_CONCAT(g.group_code, ', ' ORDER BY g.group_code), ''),
                    COUNT(DISTINCT gd.group_id)
             FROM disciplines d
             LEFT JOIN group_disciplines gd ON d.id = gd.discipline_id
             LEFT JOIN student_groups g ON gd.group_id = g.id
             WHERE d.teacher_id = ?
             GROUP BY d.id, d.name, d.description, d.total_hours
             ORDER BY d.name",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([&session.user_id], |r| {
            Ok(json!({
                "disciplineId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "totalHours": r.get::<_, i64>(3)?,
                "groupCodes": r.get::<_, String>(4)?,
                "groupCount": r.get::<_, i64>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "disciplines": rows }))
}

fn add(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?;
    let description = get_opt_str(params, "description");
    let total_hours = require_positive_hours(params)?;
    let assignments = parse_group_assignments(params, true)?;

    // Discipline plus its associations commit together or not at all.
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    for a in &assignments {
        if !group_exists(&tx, &a.group_id)? {
            return Err(HandlerErr::not_found(format!("group not found: {}", a.group_id)));
        }
    }
    let discipline_id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO disciplines(id, name, description, total_hours, teacher_id)
         VALUES(?, ?, ?, ?, ?)",
        (&discipline_id, &name, &description, total_hours, &session.user_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "disciplines"))?;
    for a in &assignments {
        tx.execute(
            "INSERT INTO group_disciplines(group_id, discipline_id, semester)
             VALUES(?, ?, ?)",
            (&a.group_id, &discipline_id, a.semester),
        )
        .map_err(|e| HandlerErr::db_update(e, "group_disciplines"))?;
    }
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "disciplineId": discipline_id }))
}

fn update(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let discipline_id = get_required_str(params, "disciplineId")?;
    owned_discipline(conn, &discipline_id, &session.user_id)?;

    let name = get_required_str(params, "name")?;
    let description = get_opt_str(params, "description");
    let total_hours = require_positive_hours(params)?;

    conn.execute(
        "UPDATE disciplines
         SET name = ?, description = ?, total_hours = ?
         WHERE id = ? AND teacher_id = ?",
        (&name, &description, total_hours, &discipline_id, &session.user_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "disciplines"))?;

    Ok(json!({ "ok": true }))
}

fn delete(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let discipline_id = get_required_str(params, "disciplineId")?;
    let name = owned_discipline(conn, &discipline_id, &session.user_id)?;

    // Cascades to group_disciplines and schedule rows.
    conn.execute(
        "DELETE FROM disciplines WHERE id = ? AND teacher_id = ?",
        (&discipline_id, &session.user_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "disciplines"))?;

    Ok(json!({ "deleted": name }))
}

/// Full replace of a discipline's group set: delete-all-then-insert inside
/// one transaction, so a bad group id cannot leave the set half rewritten.
fn set_groups(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let discipline_id = get_required_str(params, "disciplineId")?;
    owned_discipline(conn, &discipline_id, &session.user_id)?;
    let assignments = parse_group_assignments(params, false)?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    for a in &assignments {
        if !group_exists(&tx, &a.group_id)? {
            return Err(HandlerErr::not_found(format!("group not found: {}", a.group_id)));
        }
    }
    tx.execute(
        "DELETE FROM group_disciplines WHERE discipline_id = ?",
        [&discipline_id],
    )
    .map_err(|e| HandlerErr::db_update(e, "group_disciplines"))?;
    for a in &assignments {
        tx.execute(
            "INSERT INTO group_disciplines(group_id, discipline_id, semester)
             VALUES(?, ?, ?)",
            (&a.group_id, &discipline_id, a.semester),
        )
        .map_err(|e| HandlerErr::db_update(e, "group_disciplines"))?;
    }
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "groupCount": assignments.len() }))
}

fn groups_of(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let discipline_id = get_required_str(params, "disciplineId")?;
    owned_discipline(conn, &discipline_id, &session.user_id)?;

    let mut stmt = conn
        .prepare(
            "SELECT gd.group_id, g.group_code, gd.semester
             FROM group_disciplines gd
             JOIN student_groups g ON gd.group_id = g.id
             WHERE gd.discipline_id = ?
             ORDER BY g.group_code",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([&discipline_id], |r| {
            Ok(json!({
                "groupId": r.get::<_, String>(0)?,
                "groupCode": r.get::<_, String>(1)?,
                "semester": r.get::<_, i64>(2)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "groups": rows }))
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
        "teacher.disciplines" => Some(dispatch(state, req, |c, s, _| list_owned(c, s))),
        "teacher.addDiscipline" => Some(dispatch(state, req, add)),
        "teacher.updateDiscipline" => Some(dispatch(state, req, update)),
        "teacher.deleteDiscipline" => Some(dispatch(state, req, delete)),
        "teacher.setDisciplineGroups" => Some(dispatch(state, req, set_groups)),
        "teacher.disciplineGroups" => Some(dispatch(state, req, groups_of)),
        _ => None,
    }
}
