use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_opt_str, get_required_str, require_session, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::session::{self, Role, SessionStore};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// First-run path: a fresh workspace starts with no accounts. Creates the
/// initial Administrator and refuses once any user exists.
fn bootstrap(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let login = get_required_str(params, "login")?;
    let password = get_required_str(params, "password")?;
    let full_name = get_required_str(params, "fullName")?;

    let user_count: i64 = conn
        .query_row("SELECT COUNT(*) FROM users", [], |r| r.get(0))
        .map_err(HandlerErr::db_query)?;
    if user_count > 0 {
        return Err(HandlerErr::new(
            "already_initialized",
            "workspace already has users",
        ));
    }

    let id = Uuid::new_v4().to_string();
    let salt = session::new_salt();
    let hash = session::hash_password(&salt, &password);
    conn.execute(
        "INSERT INTO users(id, login, password_salt, password_hash, full_name, role)
         VALUES(?, ?, ?, ?, ?, 'Administrator')",
        (&id, &login, &salt, &hash, &full_name),
    )
    .map_err(|e| HandlerErr::db_update(e, "users"))?;

    Ok(json!({ "userId": id }))
}

fn login(
    conn: &Connection,
    sessions: &mut SessionStore,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let login = get_required_str(params, "login")?;
    let password = get_required_str(params, "password")?;

    let row = conn
        .query_row(
            "SELECT id, login, password_salt, password_hash, full_name, role, group_id
             FROM users
             WHERE login = ?",
            [&login],
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, Option<String>>(6)?,
                ))
            },
        )
        .optional()
        .map_err(HandlerErr::db_query)?;

    // One generic failure for both unknown login and wrong password.
    let Some((user_id, login, salt, hash, full_name, role_str, group_id)) = row else {
        return Err(HandlerErr::new(
            "invalid_credentials",
            "invalid login or password",
        ));
    };
    if !session::verify_password(&salt, &hash, &password) {
        return Err(HandlerErr::new(
            "invalid_credentials",
            "invalid login or password",
        ));
    }
    let role = Role::parse(&role_str)
        .ok_or_else(|| HandlerErr::new("db_query_failed", format!("unknown role: {}", role_str)))?;

    let token = sessions.open(
        user_id.clone(),
        login,
        full_name.clone(),
        role,
        group_id.clone(),
        Utc::now(),
    );

    Ok(json!({
        "token": token,
        "userId": user_id,
        "fullName": full_name,
        "role": role.as_str(),
        "groupId": group_id
    }))
}

fn handle_bootstrap(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match bootstrap(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_login(state: &mut AppState, req: &Request) -> serde_json::Value {
    let AppState { db, sessions, .. } = state;
    let Some(conn) = db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match login(conn, sessions, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

fn handle_logout(state: &mut AppState, req: &Request) -> serde_json::Value {
    // Idempotent: logging out an unknown token is still a success.
    if let Some(token) = get_opt_str(&req.params, "token") {
        state.sessions.close(&token);
    }
    ok(&req.id, json!({ "ok": true }))
}

fn handle_whoami(state: &mut AppState, req: &Request) -> serde_json::Value {
    match require_session(&mut state.sessions, &req.params) {
        Ok(session) => ok(
            &req.id,
            json!({
                "userId": session.user_id,
                "login": session.login,
                "fullName": session.full_name,
                "role": session.role.as_str(),
                "groupId": session.group_id
            }),
        ),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "auth.bootstrap" => Some(handle_bootstrap(state, req)),
        "auth.login" => Some(handle_login(state, req)),
        "auth.logout" => Some(handle_logout(state, req)),
        "auth.whoami" => Some(handle_whoami(state, req)),
        _ => None,
    }
}
