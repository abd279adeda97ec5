// ==========================================
// 学籍生命周期 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键/busy_timeout）
// - 统一建表入口，保证各仓储看到同一套 schema
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version（若表不存在则返回 None）
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 幂等建表
///
/// 包含两部分:
/// 1) 学籍生命周期记录库（本系统拥有）
/// 2) 内置的花名册/容量/收费适配表（外部协作方的 SQLite 实现）
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(LIFECYCLE_SCHEMA)?;
    conn.execute_batch(COLLABORATOR_SCHEMA)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;

    match read_schema_version(conn)? {
        Some(v) if v > CURRENT_SCHEMA_VERSION => {
            tracing::warn!(
                db_version = v,
                code_version = CURRENT_SCHEMA_VERSION,
                "数据库 schema 版本高于当前程序"
            );
        }
        _ => {}
    }
    Ok(())
}

const LIFECYCLE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_scope (
    scope_id TEXT PRIMARY KEY,
    scope_type TEXT NOT NULL,
    scope_key TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(scope_type, scope_key)
);

INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
VALUES ('global', 'GLOBAL', 'global');

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL REFERENCES config_scope(scope_id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS override_record (
    override_id TEXT PRIMARY KEY,
    student_id TEXT NOT NULL,
    batch_id TEXT,
    reason TEXT NOT NULL CHECK (length(trim(reason)) > 0),
    approved_by TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_override_record_student ON override_record(student_id, created_at);

CREATE TRIGGER IF NOT EXISTS trg_override_record_no_update
BEFORE UPDATE ON override_record
BEGIN
    SELECT RAISE(ABORT, 'override_record is immutable');
END;

CREATE TRIGGER IF NOT EXISTS trg_override_record_no_delete
BEFORE DELETE ON override_record
BEGIN
    SELECT RAISE(ABORT, 'override_record is immutable');
END;

CREATE TABLE IF NOT EXISTS student_lifecycle (
    student_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    class_id TEXT,
    section TEXT,
    roll INTEGER,
    academic_year TEXT,
    attendance_pct REAL NOT NULL CHECK (attendance_pct >= 0 AND attendance_pct <= 100),
    academic_score REAL NOT NULL,
    exam_result TEXT NOT NULL CHECK (exam_result IN ('PASS', 'FAIL', 'WITHHELD')),
    status TEXT NOT NULL CHECK (status IN ('ELIGIBLE', 'RETAINED', 'CONDITIONAL', 'ARCHIVED')),
    override_id TEXT REFERENCES override_record(override_id),
    archive_id TEXT,
    proposed_class TEXT,
    proposed_section TEXT,
    proposed_roll INTEGER,
    selected_for_batch INTEGER NOT NULL DEFAULT 0,
    batch_id TEXT,
    guardian_contact TEXT,
    restored_from_archive_id TEXT,
    updated_at TEXT NOT NULL,
    CHECK (status <> 'CONDITIONAL' OR override_id IS NOT NULL),
    CHECK (status <> 'ARCHIVED' OR archive_id IS NOT NULL),
    CHECK (selected_for_batch = 0 OR status IN ('ELIGIBLE', 'CONDITIONAL'))
);
CREATE INDEX IF NOT EXISTS idx_student_lifecycle_cohort ON student_lifecycle(class_id, academic_year, status);
CREATE INDEX IF NOT EXISTS idx_student_lifecycle_batch ON student_lifecycle(batch_id);

CREATE TABLE IF NOT EXISTS promotion_batch (
    batch_id TEXT PRIMARY KEY,
    source_class TEXT NOT NULL,
    source_year TEXT NOT NULL,
    target_class TEXT,
    target_year TEXT,
    status TEXT NOT NULL CHECK (status IN ('DRAFT', 'CONFIRMED', 'EXECUTED', 'REJECTED')),
    revision INTEGER NOT NULL DEFAULT 1,
    owner TEXT NOT NULL,
    confirmed_projection INTEGER,
    rejected_reason TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    executed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_promotion_batch_source ON promotion_batch(source_class, source_year);

CREATE TABLE IF NOT EXISTS promotion_batch_member (
    batch_id TEXT NOT NULL REFERENCES promotion_batch(batch_id),
    student_id TEXT NOT NULL,
    seq_no INTEGER NOT NULL,
    PRIMARY KEY (batch_id, student_id)
);

CREATE TABLE IF NOT EXISTS record_claim (
    student_id TEXT PRIMARY KEY,
    batch_id TEXT NOT NULL REFERENCES promotion_batch(batch_id),
    claimed_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_record_claim_batch ON record_claim(batch_id);

CREATE TABLE IF NOT EXISTS academic_snapshot (
    snapshot_id TEXT PRIMARY KEY,
    student_id TEXT NOT NULL,
    batch_id TEXT NOT NULL,
    class_id TEXT,
    section TEXT,
    roll INTEGER,
    academic_year TEXT,
    attendance_pct REAL NOT NULL,
    academic_score REAL NOT NULL,
    exam_result TEXT NOT NULL,
    final_status TEXT NOT NULL,
    override_id TEXT,
    captured_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_academic_snapshot_student ON academic_snapshot(student_id, captured_at);

CREATE TABLE IF NOT EXISTS archive_entry (
    archive_id TEXT PRIMARY KEY,
    student_id TEXT NOT NULL,
    student_name TEXT NOT NULL,
    archived_from_class TEXT,
    archived_from_section TEXT,
    archived_roll INTEGER,
    archived_year TEXT,
    exit_status TEXT NOT NULL CHECK (exit_status IN ('GRADUATED', 'WITHDRAWN', 'EXPELLED', 'TRANSFER')),
    archived_at TEXT NOT NULL,
    archived_by TEXT NOT NULL,
    reactivation_reason TEXT,
    restored_by TEXT,
    restored_at TEXT,
    CHECK (reactivation_reason IS NULL OR length(trim(reactivation_reason)) > 0)
);
CREATE INDEX IF NOT EXISTS idx_archive_entry_student ON archive_entry(student_id, archived_at);
CREATE INDEX IF NOT EXISTS idx_archive_entry_cohort ON archive_entry(archived_from_class, archived_year);

CREATE TRIGGER IF NOT EXISTS trg_archive_entry_no_delete
BEFORE DELETE ON archive_entry
BEGIN
    SELECT RAISE(ABORT, 'archive_entry is never deleted');
END;

CREATE TABLE IF NOT EXISTS notification_outbox (
    notification_id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK (kind IN ('PROMOTION_NOTICE', 'ARCHIVE_CONFIRMATION')),
    student_id TEXT NOT NULL,
    guardian_contact TEXT,
    payload_json TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('PENDING', 'SENT', 'PARKED')),
    attempts INTEGER NOT NULL DEFAULT 0,
    last_error TEXT,
    created_at TEXT NOT NULL,
    sent_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_notification_outbox_status ON notification_outbox(status, created_at);

CREATE TABLE IF NOT EXISTS action_log (
    log_seq INTEGER PRIMARY KEY AUTOINCREMENT,
    action_id TEXT NOT NULL UNIQUE,
    action_type TEXT NOT NULL,
    action_ts TEXT NOT NULL,
    actor TEXT NOT NULL,
    entity_id TEXT NOT NULL,
    reason TEXT,
    batch_id TEXT,
    payload_json TEXT,
    detail TEXT
);
CREATE INDEX IF NOT EXISTS idx_action_log_entity ON action_log(entity_id, log_seq);
CREATE INDEX IF NOT EXISTS idx_action_log_actor ON action_log(actor, log_seq);
CREATE INDEX IF NOT EXISTS idx_action_log_type ON action_log(action_type, log_seq);

CREATE TRIGGER IF NOT EXISTS trg_action_log_no_update
BEFORE UPDATE ON action_log
BEGIN
    SELECT RAISE(ABORT, 'action_log is append-only');
END;

CREATE TRIGGER IF NOT EXISTS trg_action_log_no_delete
BEFORE DELETE ON action_log
BEGIN
    SELECT RAISE(ABORT, 'action_log is append-only');
END;
"#;

const COLLABORATOR_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS student_directory (
    student_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    class_id TEXT NOT NULL,
    section TEXT NOT NULL,
    roll INTEGER NOT NULL,
    academic_year TEXT NOT NULL,
    attendance_pct REAL NOT NULL,
    academic_score REAL NOT NULL,
    exam_result TEXT NOT NULL,
    guardian_contact TEXT
);
CREATE INDEX IF NOT EXISTS idx_student_directory_cohort ON student_directory(class_id, academic_year);

CREATE TABLE IF NOT EXISTS class_capacity (
    class_id TEXT NOT NULL,
    academic_year TEXT NOT NULL,
    capacity INTEGER,
    current_enrolled INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (class_id, academic_year)
);

CREATE TABLE IF NOT EXISTS fee_assignment (
    assignment_id TEXT PRIMARY KEY,
    student_id TEXT NOT NULL,
    academic_year TEXT NOT NULL,
    status TEXT NOT NULL CHECK (status IN ('ASSIGNED', 'REVOKED')),
    created_at TEXT NOT NULL,
    revoked_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_fee_assignment_student ON fee_assignment(student_id, academic_year);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_schema_version_absent_on_empty_db() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), None);
    }

    #[test]
    fn test_action_log_rejects_update_and_delete() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute(
            "INSERT INTO action_log (action_id, action_type, action_ts, actor, entity_id)
             VALUES ('a1', 'override-promotion', '2026-01-01 00:00:00', 'u1', 'S1')",
            [],
        )
        .unwrap();

        assert!(conn
            .execute("UPDATE action_log SET actor = 'u2' WHERE action_id = 'a1'", [])
            .is_err());
        assert!(conn
            .execute("DELETE FROM action_log WHERE action_id = 'a1'", [])
            .is_err());
    }

    #[test]
    fn test_conditional_requires_override_id() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO student_lifecycle (student_id, name, attendance_pct, academic_score,
                exam_result, status, selected_for_batch, updated_at)
             VALUES ('S1', 'A', 80, 70, 'PASS', 'CONDITIONAL', 1, '2026-01-01 00:00:00')",
            [],
        );
        assert!(result.is_err());
    }
}
