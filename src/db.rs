use rusqlite::Connection;
use std::path::Path;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("attendance.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_groups(
            id TEXT PRIMARY KEY,
            group_code TEXT NOT NULL UNIQUE,
            specialization TEXT,
            year_of_study INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users(
            id TEXT PRIMARY KEY,
            login TEXT NOT NULL UNIQUE,
            password_salt TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            full_name TEXT NOT NULL,
            role TEXT NOT NULL CHECK(role IN ('Student','Teacher','Administrator')),
            email TEXT,
            phone TEXT,
            group_id TEXT,
            FOREIGN KEY(group_id) REFERENCES student_groups(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_group ON users(group_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_users_role ON users(role)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS disciplines(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            total_hours INTEGER NOT NULL,
            teacher_id TEXT NOT NULL,
            FOREIGN KEY(teacher_id) REFERENCES users(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_disciplines_teacher ON disciplines(teacher_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS group_disciplines(
            group_id TEXT NOT NULL,
            discipline_id TEXT NOT NULL,
            semester INTEGER NOT NULL,
            PRIMARY KEY(group_id, discipline_id),
            FOREIGN KEY(group_id) REFERENCES student_groups(id) ON DELETE CASCADE,
            FOREIGN KEY(discipline_id) REFERENCES disciplines(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_group_disciplines_discipline
         ON group_disciplines(discipline_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schedule(
            id TEXT PRIMARY KEY,
            discipline_id TEXT NOT NULL,
            group_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            lesson_date TEXT NOT NULL,
            lesson_time TEXT NOT NULL,
            classroom TEXT,
            lesson_type TEXT NOT NULL,
            UNIQUE(group_id, lesson_date, lesson_time),
            FOREIGN KEY(discipline_id) REFERENCES disciplines(id) ON DELETE CASCADE,
            FOREIGN KEY(group_id) REFERENCES student_groups(id) ON DELETE CASCADE,
            FOREIGN KEY(teacher_id) REFERENCES users(id) ON DELETE CASCADE
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_teacher_date ON schedule(teacher_id, lesson_date)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_schedule_group_date ON schedule(group_id, lesson_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            schedule_id TEXT NOT NULL,
            status TEXT NOT NULL CHECK(status IN ('present','absent','excused','late')),
            notes TEXT,
            marked_by TEXT,
            marked_at TEXT NOT NULL,
            UNIQUE(student_id, schedule_id),
            FOREIGN KEY(student_id) REFERENCES users(id) ON DELETE CASCADE,
            FOREIGN KEY(schedule_id) REFERENCES schedule(id) ON DELETE CASCADE,
            FOREIGN KEY(marked_by) REFERENCES users(id) ON DELETE SET NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_student ON attendance(student_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_schedule ON attendance(schedule_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_marked_at ON attendance(marked_at)",
        [],
    )?;

    Ok(conn)
}
