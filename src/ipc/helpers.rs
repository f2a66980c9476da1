use chrono::{NaiveDate, NaiveTime, Utc};
use serde_json::json;

use crate::ipc::error::err;
use crate::session::{AuthError, Role, Session, SessionStore};

pub struct HandlerErr {
    pub code: &'static str,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

impl HandlerErr {
    pub fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }

    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        HandlerErr {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::new("bad_params", message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation", message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new("not_found", message)
    }

    pub fn db_query(e: rusqlite::Error) -> Self {
        Self::new("db_query_failed", e.to_string())
    }

    pub fn db_update(e: rusqlite::Error, table: &str) -> Self {
        HandlerErr {
            code: "db_update_failed",
            message: e.to_string(),
            details: Some(json!({ "table": table })),
        }
    }

    pub fn db_tx(e: rusqlite::Error) -> Self {
        Self::new("db_tx_failed", e.to_string())
    }

    pub fn db_commit(e: rusqlite::Error) -> Self {
        Self::new("db_commit_failed", e.to_string())
    }
}

/// Role gate shared by every authenticated method. Pulls `params.token`,
/// resolves it against the session store, and checks the required role.
/// Missing, unknown, and idled-out tokens are indistinguishable to the caller.
pub fn require_role(
    sessions: &mut SessionStore,
    params: &serde_json::Value,
    required: Role,
) -> Result<Session, HandlerErr> {
    guard(sessions, params, Some(required))
}

/// Any-authenticated variant of the guard.
pub fn require_session(
    sessions: &mut SessionStore,
    params: &serde_json::Value,
) -> Result<Session, HandlerErr> {
    guard(sessions, params, None)
}

fn guard(
    sessions: &mut SessionStore,
    params: &serde_json::Value,
    required: Option<Role>,
) -> Result<Session, HandlerErr> {
    let Some(token) = params.get("token").and_then(|v| v.as_str()) else {
        return Err(HandlerErr::new("not_authenticated", "missing token"));
    };
    sessions
        .authorize(token, required, Utc::now())
        .map_err(|e| match e {
            AuthError::NotAuthenticated => {
                HandlerErr::new("not_authenticated", "session missing or expired")
            }
            AuthError::AccessDenied => HandlerErr::new("access_denied", "access denied"),
        })
}

pub fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

/// Absent or null keys become None; empty strings pass through as provided.
pub fn get_opt_str(params: &serde_json::Value, key: &str) -> Option<String> {
    params
        .get(key)
        .filter(|v| !v.is_null())
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

pub fn get_required_i64(params: &serde_json::Value, key: &str) -> Result<i64, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn parse_date(s: &str) -> Result<NaiveDate, HandlerErr> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| HandlerErr::validation(format!("bad date: {}", s)))
}

/// Optional YYYY-MM-DD parameter. Absent and null are None; a malformed
/// value is a validation failure, never silently today.
pub fn get_opt_date(
    params: &serde_json::Value,
    key: &str,
) -> Result<Option<NaiveDate>, HandlerErr> {
    match get_opt_str(params, key) {
        Some(s) => parse_date(&s).map(Some),
        None => Ok(None),
    }
}

pub fn get_required_date(params: &serde_json::Value, key: &str) -> Result<NaiveDate, HandlerErr> {
    parse_date(&get_required_str(params, key)?)
}

pub fn parse_time(s: &str) -> Result<NaiveTime, HandlerErr> {
    NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| HandlerErr::validation(format!("bad time: {}", s)))
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}
