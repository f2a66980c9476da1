#![allow(dead_code)]

use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

pub fn next_id() -> String {
    NEXT_ID.fetch_add(1, Ordering::Relaxed).to_string()
}

pub fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

pub fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_attendanced");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn attendanced");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

pub fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": next_id(), "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");
    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    serde_json::from_str(line.trim()).expect("parse response json")
}

/// Sends a request and unwraps `result`, panicking with context on failure.
pub fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().expect("result")
}

pub fn error_code(value: &serde_json::Value) -> &str {
    assert_eq!(
        value.get("ok").and_then(|v| v.as_bool()),
        Some(false),
        "expected an error response, got: {}",
        value
    );
    value
        .get("error")
        .and_then(|v| v.get("code"))
        .and_then(|v| v.as_str())
        .expect("error code")
}

/// Opens a fresh workspace, bootstraps the first administrator, and logs them
/// in. Returns the admin session token.
pub fn setup_workspace(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    prefix: &str,
) -> String {
    let workspace = temp_dir(prefix);
    request_ok(
        stdin,
        reader,
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    request_ok(
        stdin,
        reader,
        "auth.bootstrap",
        json!({ "login": "admin", "password": "admin123", "fullName": "Root Admin" }),
    );
    login(stdin, reader, "admin", "admin123")
}

pub fn login(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    login: &str,
    password: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        "auth.login",
        json!({ "login": login, "password": password }),
    );
    result
        .get("token")
        .and_then(|v| v.as_str())
        .expect("token")
        .to_string()
}

pub fn add_group(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    admin_token: &str,
    code: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        "admin.addGroup",
        json!({
            "token": admin_token,
            "groupCode": code,
            "specialization": "Software Engineering",
            "yearOfStudy": 2
        }),
    );
    result
        .get("groupId")
        .and_then(|v| v.as_str())
        .expect("groupId")
        .to_string()
}

pub fn add_teacher(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    admin_token: &str,
    login: &str,
    full_name: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        "admin.addUser",
        json!({
            "token": admin_token,
            "login": login,
            "password": "teach123",
            "fullName": full_name,
            "role": "Teacher"
        }),
    );
    result
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string()
}

pub fn add_student(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    admin_token: &str,
    login: &str,
    full_name: &str,
    group_id: Option<&str>,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        "admin.addUser",
        json!({
            "token": admin_token,
            "login": login,
            "password": "student123",
            "fullName": full_name,
            "role": "Student",
            "groupId": group_id
        }),
    );
    result
        .get("userId")
        .and_then(|v| v.as_str())
        .expect("userId")
        .to_string()
}

pub fn add_discipline(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    teacher_token: &str,
    name: &str,
    group_id: &str,
    semester: i64,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        "teacher.addDiscipline",
        json!({
            "token": teacher_token,
            "name": name,
            "totalHours": 100,
            "groups": [{ "groupId": group_id, "semester": semester }]
        }),
    );
    result
        .get("disciplineId")
        .and_then(|v| v.as_str())
        .expect("disciplineId")
        .to_string()
}

pub fn add_schedule(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    admin_token: &str,
    discipline_id: &str,
    group_id: &str,
    teacher_id: &str,
    date: &str,
    time: &str,
) -> String {
    let result = request_ok(
        stdin,
        reader,
        "admin.addSchedule",
        json!({
            "token": admin_token,
            "disciplineId": discipline_id,
            "groupId": group_id,
            "teacherId": teacher_id,
            "lessonDate": date,
            "lessonTime": time,
            "classroom": "101",
            "lessonType": "lecture"
        }),
    );
    result
        .get("scheduleId")
        .and_then(|v| v.as_str())
        .expect("scheduleId")
        .to_string()
}

pub fn today_string() -> String {
    chrono::Utc::now().date_naive().to_string()
}
