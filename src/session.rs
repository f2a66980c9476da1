use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

/// Sessions idle out after two hours without a request.
const IDLE_LIMIT_HOURS: i64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Student,
    Teacher,
    Administrator,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "Student",
            Role::Teacher => "Teacher",
            Role::Administrator => "Administrator",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "Student" => Some(Role::Student),
            "Teacher" => Some(Role::Teacher),
            "Administrator" => Some(Role::Administrator),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub login: String,
    pub full_name: String,
    pub role: Role,
    pub group_id: Option<String>,
    last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Token missing, unknown, or idled out.
    NotAuthenticated,
    /// Live session, wrong role for the operation.
    AccessDenied,
}

pub struct SessionStore {
    map: HashMap<String, Session>,
    idle_limit: Duration,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore {
            map: HashMap::new(),
            idle_limit: Duration::hours(IDLE_LIMIT_HOURS),
        }
    }

    pub fn open(
        &mut self,
        user_id: String,
        login: String,
        full_name: String,
        role: Role,
        group_id: Option<String>,
        now: DateTime<Utc>,
    ) -> String {
        let token = Uuid::new_v4().to_string();
        self.map.insert(
            token.clone(),
            Session {
                user_id,
                login,
                full_name,
                role,
                group_id,
                last_seen: now,
            },
        );
        token
    }

    pub fn close(&mut self, token: &str) {
        self.map.remove(token);
    }

    /// Resolve a token to its session, enforcing idle expiry and an optional
    /// required role. A successful lookup refreshes the idle timer; a failed
    /// role check does not invalidate the session.
    pub fn authorize(
        &mut self,
        token: &str,
        required: Option<Role>,
        now: DateTime<Utc>,
    ) -> Result<Session, AuthError> {
        let expired = match self.map.get(token) {
            Some(s) => now - s.last_seen > self.idle_limit,
            None => return Err(AuthError::NotAuthenticated),
        };
        if expired {
            self.map.remove(token);
            return Err(AuthError::NotAuthenticated);
        }
        let Some(session) = self.map.get_mut(token) else {
            return Err(AuthError::NotAuthenticated);
        };
        if let Some(role) = required {
            if session.role != role {
                return Err(AuthError::AccessDenied);
            }
        }
        session.last_seen = now;
        Ok(session.clone())
    }
}

pub fn new_salt() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Salted SHA-256 digest, hex-encoded. The stored credential is
/// (salt, hash_password(salt, password)).
pub fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

pub fn verify_password(salt: &str, stored_hash: &str, password: &str) -> bool {
    hash_password(salt, password) == stored_hash
}
