use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    get_opt_str, get_required_i64, get_required_str, require_role, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::session::{self, Role, Session};
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn login_taken(conn: &Connection, login: &str, except: Option<&str>) -> Result<bool, HandlerErr> {
    let existing: Option<String> = match except {
        Some(id) => conn
            .query_row(
                "SELECT id FROM users WHERE login = ? AND id != ?",
                (login, id),
                |r| r.get(0),
            )
            .optional(),
        None => conn
            .query_row("SELECT id FROM users WHERE login = ?", [login], |r| r.get(0))
            .optional(),
    }
    .map_err(HandlerErr::db_query)?;
    Ok(existing.is_some())
}

fn group_code_taken(
    conn: &Connection,
    code: &str,
    except: Option<&str>,
) -> Result<bool, HandlerErr> {
    let existing: Option<String> = match except {
        Some(id) => conn
            .query_row(
                "SELECT id FROM student_groups WHERE group_code = ? AND id != ?",
                (code, id),
                |r| r.get(0),
            )
            .optional(),
        None => conn
            .query_row(
                "SELECT id FROM student_groups WHERE group_code = ?",
                [code],
                |r| r.get(0),
            )
            .optional(),
    }
    .map_err(HandlerErr::db_query)?;
    Ok(existing.is_some())
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

fn list_users(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    // Optional filters are omitted from the SQL when absent, never compared
    // against NULL.
    let mut sql = String::from(
        "SELECT u.id, u.login, u.full_name, u.role, u.email, u.phone, g.group_code
         FROM users u
         LEFT JOIN student_groups g ON u.group_id = g.id
         WHERE 1=1",
    );
    let mut bind: Vec<Value> = Vec::new();
    if let Some(role) = get_opt_str(params, "role") {
        sql.push_str(" AND u.role = ?");
        bind.push(Value::Text(role));
    }
    if let Some(gid) = get_opt_str(params, "groupId") {
        sql.push_str(" AND u.group_id = ?");
        bind.push(Value::Text(gid));
    }
    if let Some(search) = get_opt_str(params, "search") {
        sql.push_str(" AND u.full_name LIKE ?");
        bind.push(Value::Text(format!("%{}%", search)));
    }
    sql.push_str(" ORDER BY u.role, u.full_name");

    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::db_query)?;
    let users = stmt
        .query_map(params_from_iter(bind), |r| {
            Ok(json!({
                "userId": r.get::<_, String>(0)?,
                "login": r.get::<_, String>(1)?,
                "fullName": r.get::<_, String>(2)?,
                "role": r.get::<_, String>(3)?,
                "email": r.get::<_, Option<String>>(4)?,
                "phone": r.get::<_, Option<String>>(5)?,
                "groupCode": r.get::<_, Option<String>>(6)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "users": users }))
}

fn add_user(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let login = get_required_str(params, "login")?;
    let password = get_required_str(params, "password")?;
    let full_name = get_required_str(params, "fullName")?;
    let role_str = get_required_str(params, "role")?;
    let role = Role::parse(&role_str)
        .ok_or_else(|| HandlerErr::validation(format!("unknown role: {}", role_str)))?;
    let email = get_opt_str(params, "email");
    let phone = get_opt_str(params, "phone");
    // A group affiliation only makes sense for students.
    let group_id = match role {
        Role::Student => get_opt_str(params, "groupId"),
        _ => None,
    };

    if let Some(gid) = group_id.as_deref() {
        if !group_exists(conn, gid)? {
            return Err(HandlerErr::not_found("group not found"));
        }
    }

    // Uniqueness check and insert in one transaction; the UNIQUE constraint
    // is the backstop for concurrent writers.
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    if login_taken(&tx, &login, None)? {
        return Err(HandlerErr::new("login_taken", "login already in use"));
    }
    let id = Uuid::new_v4().to_string();
    let salt = session::new_salt();
    let hash = session::hash_password(&salt, &password);
    tx.execute(
        "INSERT INTO users(id, login, password_salt, password_hash, full_name,
                           role, email, phone, group_id)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &login,
            &salt,
            &hash,
            &full_name,
            role.as_str(),
            &email,
            &phone,
            &group_id,
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "users"))?;
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "userId": id }))
}

fn update_user(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let login = get_required_str(params, "login")?;
    let full_name = get_required_str(params, "fullName")?;
    let role_str = get_required_str(params, "role")?;
    let role = Role::parse(&role_str)
        .ok_or_else(|| HandlerErr::validation(format!("unknown role: {}", role_str)))?;
    let email = get_opt_str(params, "email");
    let phone = get_opt_str(params, "phone");
    let group_id = match role {
        Role::Student => get_opt_str(params, "groupId"),
        _ => None,
    };

    let exists = conn
        .query_row("SELECT 1 FROM users WHERE id = ?", [&user_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?
        .is_some();
    if !exists {
        return Err(HandlerErr::not_found("user not found"));
    }
    if let Some(gid) = group_id.as_deref() {
        if !group_exists(conn, gid)? {
            return Err(HandlerErr::not_found("group not found"));
        }
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    if login_taken(&tx, &login, Some(&user_id))? {
        return Err(HandlerErr::new("login_taken", "login already in use"));
    }
    tx.execute(
        "UPDATE users
         SET login = ?, full_name = ?, role = ?, email = ?, phone = ?, group_id = ?
         WHERE id = ?",
        (&login, &full_name, role.as_str(), &email, &phone, &group_id, &user_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "users"))?;
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "ok": true }))
}

fn delete_user(
    conn: &Connection,
    session: &Session,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    if user_id == session.user_id {
        return Err(HandlerErr::new(
            "self_delete",
            "cannot delete your own account",
        ));
    }
    let changed = conn
        .execute("DELETE FROM users WHERE id = ?", [&user_id])
        .map_err(|e| HandlerErr::db_update(e, "users"))?;
    if changed == 0 {
        return Err(HandlerErr::not_found("user not found"));
    }
    Ok(json!({ "ok": true }))
}

fn list_groups(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT g.id, g.group_code, g.specialization, g.year_of_study,
                    COUNT(DISTINCT u.id)
             FROM student_groups g
             LEFT JOIN users u ON g.id = u.group_id AND u.role = 'Student'
             GROUP BY g.id, g.group_code, g.specialization, g.year_of_study
             ORDER BY g.group_code",
        )
        .map_err(HandlerErr::db_query)?;
    let groups = stmt
        .query_map([], |r| {
            Ok(json!({
                "groupId": r.get::<_, String>(0)?,
                "groupCode": r.get::<_, String>(1)?,
                "specialization": r.get::<_, Option<String>>(2)?,
                "yearOfStudy": r.get::<_, i64>(3)?,
                "studentCount": r.get::<_, i64>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "groups": groups }))
}

fn add_group(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let group_code = get_required_str(params, "groupCode")?;
    let specialization = get_opt_str(params, "specialization");
    let year_of_study = get_required_i64(params, "yearOfStudy")?;

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    if group_code_taken(&tx, &group_code, None)? {
        return Err(HandlerErr::new(
            "group_code_taken",
            "group code already in use",
        ));
    }
    let id = Uuid::new_v4().to_string();
    tx.execute(
        "INSERT INTO student_groups(id, group_code, specialization, year_of_study)
         VALUES(?, ?, ?, ?)",
        (&id, &group_code, &specialization, year_of_study),
    )
    .map_err(|e| HandlerErr::db_update(e, "student_groups"))?;
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "groupId": id }))
}

fn update_group(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let group_code = get_required_str(params, "groupCode")?;
    let specialization = get_opt_str(params, "specialization");
    let year_of_study = get_required_i64(params, "yearOfStudy")?;

    if !group_exists(conn, &group_id)? {
        return Err(HandlerErr::not_found("group not found"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    if group_code_taken(&tx, &group_code, Some(&group_id))? {
        return Err(HandlerErr::new(
            "group_code_taken",
            "group code already in use",
        ));
    }
    tx.execute(
        "UPDATE student_groups
         SET group_code = ?, specialization = ?, year_of_study = ?
         WHERE id = ?",
        (&group_code, &specialization, year_of_study, &group_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "student_groups"))?;
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "ok": true }))
}

/// Deleting a group detaches its students (group_id goes NULL) rather than
/// deleting them; schedule and association rows for the group do cascade.
fn delete_group(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    if !group_exists(conn, &group_id)? {
        return Err(HandlerErr::not_found("group not found"));
    }
    let detached: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM users WHERE group_id = ? AND role = 'Student'",
            [&group_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    conn.execute("DELETE FROM student_groups WHERE id = ?", [&group_id])
        .map_err(|e| HandlerErr::db_update(e, "student_groups"))?;
    Ok(json!({ "detachedStudents": detached }))
}

fn add_student_to_group(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    let login = get_required_str(params, "login")?;
    let password = get_required_str(params, "password")?;
    let full_name = get_required_str(params, "fullName")?;

    if !group_exists(conn, &group_id)? {
        return Err(HandlerErr::not_found("group not found"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    if login_taken(&tx, &login, None)? {
        return Err(HandlerErr::new("login_taken", "login already in use"));
    }
    let id = Uuid::new_v4().to_string();
    let salt = session::new_salt();
    let hash = session::hash_password(&salt, &password);
    tx.execute(
        "INSERT INTO users(id, login, password_salt, password_hash, full_name, role, group_id)
         VALUES(?, ?, ?, ?, ?, 'Student', ?)",
        (&id, &login, &salt, &hash, &full_name, &group_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "users"))?;
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "userId": id }))
}

fn group_disciplines(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let group_id = get_required_str(params, "groupId")?;
    if !group_exists(conn, &group_id)? {
        return Err(HandlerErr::not_found("group not found"));
    }
    let mut stmt = conn
        .prepare(
            "SELECT d.id, d.name, d.description, d.total_hours, u.full_name, gd.semester
             FROM group_disciplines gd
             JOIN disciplines d ON gd.discipline_id = d.id
             JOIN users u ON d.teacher_id = u.id
             WHERE gd.group_id = ?
             ORDER BY gd.semester, d.name",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([&group_id], |r| {
            Ok(json!({
                "disciplineId": r.get::<_, String>(0)?,
                "name": r.get::<_, String>(1)?,
                "description": r.get::<_, Option<String>>(2)?,
                "totalHours": r.get::<_, i64>(3)?,
                "teacherName": r.get::<_, String>(4)?,
                "semester": r.get::<_, i64>(5)?
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
        "admin.listUsers" => Some(dispatch(state, req, |c, _, p| list_users(c, p))),
        "admin.addUser" => Some(dispatch(state, req, |c, _, p| add_user(c, p))),
        "admin.updateUser" => Some(dispatch(state, req, |c, _, p| update_user(c, p))),
        "admin.deleteUser" => Some(dispatch(state, req, |c, s, p| delete_user(c, s, p))),
        "admin.listGroups" => Some(dispatch(state, req, |c, _, _| list_groups(c))),
        "admin.addGroup" => Some(dispatch(state, req, |c, _, p| add_group(c, p))),
        "admin.updateGroup" => Some(dispatch(state, req, |c, _, p| update_group(c, p))),
        "admin.deleteGroup" => Some(dispatch(state, req, |c, _, p| delete_group(c, p))),
        "admin.addStudentToGroup" => Some(dispatch(state, req, |c, _, p| add_student_to_group(c, p))),
        "admin.groupDisciplines" => Some(dispatch(state, req, |c, _, p| group_disciplines(c, p))),
        _ => None,
    }
}
