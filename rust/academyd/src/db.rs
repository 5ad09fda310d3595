use anyhow::Context;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub const DB_FILE: &str = "academyd.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace).with_context(|| {
        format!("failed to create workspace {}", workspace.to_string_lossy())
    })?;
    let db_path = workspace.join(DB_FILE);
    let conn = Connection::open(&db_path)
        .with_context(|| format!("failed to open database {}", db_path.to_string_lossy()))?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;
    conn.busy_timeout(Duration::from_secs(5))?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS academies(
            id TEXT PRIMARY KEY,
            academy_id TEXT NOT NULL UNIQUE,
            academy_name TEXT NOT NULL,
            address TEXT,
            city TEXT,
            state TEXT,
            country TEXT,
            pincode TEXT,
            website TEXT,
            logo_url TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            owner_user_id TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS teachers(
            id TEXT PRIMARY KEY,
            teacher_code TEXT NOT NULL UNIQUE,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS teacher_academy_map(
            teacher_id TEXT NOT NULL,
            academy_id TEXT NOT NULL,
            PRIMARY KEY(teacher_id, academy_id),
            FOREIGN KEY(teacher_id) REFERENCES teachers(id),
            FOREIGN KEY(academy_id) REFERENCES academies(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS parents(
            id TEXT PRIMARY KEY,
            auth_user_id TEXT NOT NULL UNIQUE,
            display_name TEXT,
            email TEXT,
            phone TEXT,
            phone_digits TEXT,
            address TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_parents_phone_digits ON parents(phone_digits)",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS parent_academy_map(
            parent_id TEXT NOT NULL,
            academy_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY(parent_id, academy_id),
            FOREIGN KEY(parent_id) REFERENCES parents(id),
            FOREIGN KEY(academy_id) REFERENCES academies(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_parent_academy_map_academy ON parent_academy_map(academy_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            academy_id TEXT NOT NULL,
            student_id TEXT NOT NULL UNIQUE,
            registration_no TEXT NOT NULL UNIQUE,
            aadhar_no TEXT UNIQUE,
            first_name TEXT NOT NULL,
            last_name TEXT,
            date_of_birth TEXT NOT NULL,
            roll_no TEXT,
            class_name TEXT NOT NULL,
            class_section TEXT,
            academic_year TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            FOREIGN KEY(academy_id) REFERENCES academies(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_academy ON students(academy_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_class ON students(academy_id, class_name, class_section)",
        [],
    )?;

    // One parent per student is enforced here; one student per parent is
    // checked at link time.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS parent_student_map(
            id TEXT PRIMARY KEY,
            parent_id TEXT NOT NULL,
            student_id TEXT NOT NULL UNIQUE,
            relationship TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(parent_id) REFERENCES parents(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_parent_student_map_parent ON parent_student_map(parent_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS class_sections(
            id TEXT PRIMARY KEY,
            academy_id TEXT NOT NULL,
            class_name TEXT NOT NULL,
            section TEXT NOT NULL DEFAULT '',
            academic_year TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(academy_id, class_name, section, academic_year),
            FOREIGN KEY(academy_id) REFERENCES academies(id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance_days(
            student_id TEXT NOT NULL,
            attendance_date TEXT NOT NULL,
            state TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY(student_id, attendance_date),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_attendance(
            id TEXT PRIMARY KEY,
            academy_id TEXT NOT NULL,
            class_name TEXT NOT NULL,
            class_section TEXT NOT NULL,
            student_id TEXT NOT NULL,
            status TEXT NOT NULL,
            attendance_date TEXT NOT NULL,
            position INTEGER NOT NULL,
            is_late INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            UNIQUE(student_id, attendance_date, position),
            FOREIGN KEY(academy_id) REFERENCES academies(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_attendance_class_day
         ON student_attendance(academy_id, class_name, class_section, attendance_date)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS notifications(
            id TEXT PRIMARY KEY,
            academy_id TEXT NOT NULL,
            parent_id TEXT NOT NULL,
            student_id TEXT NOT NULL,
            message TEXT NOT NULL,
            type TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY(academy_id) REFERENCES academies(id),
            FOREIGN KEY(parent_id) REFERENCES parents(id),
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_notifications_parent ON notifications(parent_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS student_records(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            academic_year TEXT,
            subject TEXT,
            grade TEXT,
            attendance_percentage REAL,
            behavior_notes TEXT,
            report_card_url TEXT,
            report_card_path TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_student_records_student ON student_records(student_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assignments(
            id TEXT PRIMARY KEY,
            academy_id TEXT NOT NULL,
            class_section_id TEXT NOT NULL,
            teacher_id TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT,
            due_date TEXT,
            created_at TEXT NOT NULL,
            FOREIGN KEY(academy_id) REFERENCES academies(id),
            FOREIGN KEY(class_section_id) REFERENCES class_sections(id)
        )",
        [],
    )?;

    Ok(conn)
}

/// RFC 3339 UTC timestamp used for every `created_at` column.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn table_count(conn: &Connection, table: &str) -> rusqlite::Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {}", table);
    conn.query_row(&sql, [], |r| r.get(0))
}
