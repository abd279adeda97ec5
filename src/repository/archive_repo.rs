// ==========================================
// 学籍生命周期 - 校友归档仓储
// ==========================================
// 红线: 不提供删除；恢复学籍只追加注记字段
// ==========================================

use crate::domain::archive::{ArchiveEntry, Reactivation};
use crate::domain::student::Placement;
use crate::domain::types::{ExitStatus, Reason};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{fmt_ts, parse_enum, parse_opt_ts, parse_ts};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT archive_id, student_id, student_name, archived_from_class, archived_from_section,
           archived_roll, archived_year, exit_status, archived_at, archived_by,
           reactivation_reason, restored_by, restored_at
    FROM archive_entry
"#;

pub struct ArchiveEntryRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ArchiveEntryRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_by_id(&self, archive_id: &str) -> RepositoryResult<Option<ArchiveEntry>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE archive_id = ?", SELECT_COLUMNS);
        let entry = conn.query_row(&sql, params![archive_id], map_row).optional()?;
        Ok(entry)
    }

    /// 学生归档历史（旧 → 新）
    pub fn find_by_student(&self, student_id: &str) -> RepositoryResult<Vec<ArchiveEntry>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE student_id = ? ORDER BY archived_at, rowid", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![student_id], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// 班级/学年的归档条目
    pub fn find_by_cohort(&self, class_id: &str, academic_year: &str) -> RepositoryResult<Vec<ArchiveEntry>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE archived_from_class = ? AND archived_year = ? ORDER BY archived_roll, student_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let entries = stmt
            .query_map(params![class_id, academic_year], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn insert_tx(conn: &Connection, entry: &ArchiveEntry) -> RepositoryResult<()> {
        let from = entry.archived_from.as_ref();
        conn.execute(
            r#"INSERT INTO archive_entry (
                archive_id, student_id, student_name, archived_from_class, archived_from_section,
                archived_roll, archived_year, exit_status, archived_at, archived_by
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                entry.archive_id,
                entry.student_id,
                entry.student_name,
                from.map(|p| p.class_id.as_str()),
                from.map(|p| p.section.as_str()),
                from.map(|p| p.roll as i64),
                entry.archived_year,
                entry.exit_status.as_str(),
                fmt_ts(&entry.archived_at),
                entry.archived_by,
            ],
        )?;
        Ok(())
    }

    /// 最近一次尚未恢复的归档条目
    pub fn find_open_by_student_tx(
        conn: &Connection,
        student_id: &str,
    ) -> RepositoryResult<Option<ArchiveEntry>> {
        let sql = format!(
            "{} WHERE student_id = ? AND restored_at IS NULL ORDER BY archived_at DESC, rowid DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let entry = conn.query_row(&sql, params![student_id], map_row).optional()?;
        Ok(entry)
    }

    /// 追加恢复学籍注记（仅允许一次）
    pub fn annotate_reactivation_tx(
        conn: &Connection,
        archive_id: &str,
        reactivation: &Reactivation,
    ) -> RepositoryResult<()> {
        let rows = conn.execute(
            r#"UPDATE archive_entry
               SET reactivation_reason = ?, restored_by = ?, restored_at = ?
               WHERE archive_id = ? AND restored_at IS NULL"#,
            params![
                reactivation.reason.as_str(),
                reactivation.restored_by,
                fmt_ts(&reactivation.restored_at),
                archive_id,
            ],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "ArchiveEntry(open)".to_string(),
                id: archive_id.to_string(),
            });
        }
        Ok(())
    }
}

fn map_row(row: &Row) -> rusqlite::Result<ArchiveEntry> {
    let from_class: Option<String> = row.get(3)?;
    let from_section: Option<String> = row.get(4)?;
    let from_roll: Option<i64> = row.get(5)?;
    let exit_raw: String = row.get(7)?;
    let archived_raw: String = row.get(8)?;
    let reason_raw: Option<String> = row.get(10)?;
    let restored_by: Option<String> = row.get(11)?;
    let restored_at = parse_opt_ts(12, row.get(12)?)?;

    let reactivation = match (reason_raw.as_deref().and_then(Reason::new), restored_by, restored_at) {
        (Some(reason), Some(restored_by), Some(restored_at)) => Some(Reactivation {
            reason,
            restored_by,
            restored_at,
        }),
        _ => None,
    };

    Ok(ArchiveEntry {
        archive_id: row.get(0)?,
        student_id: row.get(1)?,
        student_name: row.get(2)?,
        archived_from: match (from_class, from_section, from_roll) {
            (Some(class_id), Some(section), Some(roll)) => Some(Placement {
                class_id,
                section,
                roll: roll.max(0) as u32,
            }),
            _ => None,
        },
        archived_year: row.get(6)?,
        exit_status: parse_enum(7, &exit_raw, ExitStatus::parse)?,
        archived_at: parse_ts(8, &archived_raw)?,
        archived_by: row.get(9)?,
        reactivation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_annotate_once_and_never_delete() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let entry = ArchiveEntry::new(
            "S1",
            "Asha",
            Some(Placement::new("G10", "A", 4)),
            Some("2025-2026".to_string()),
            ExitStatus::Graduated,
            "registrar",
        );
        ArchiveEntryRepository::insert_tx(&conn, &entry).unwrap();

        let open = ArchiveEntryRepository::find_open_by_student_tx(&conn, "S1").unwrap().unwrap();
        assert_eq!(open.archive_id, entry.archive_id);

        let reactivation = Reactivation {
            reason: Reason::new("re-enrolled").unwrap(),
            restored_by: "registrar".to_string(),
            restored_at: chrono::Local::now().naive_local(),
        };
        ArchiveEntryRepository::annotate_reactivation_tx(&conn, &entry.archive_id, &reactivation).unwrap();
        assert!(ArchiveEntryRepository::annotate_reactivation_tx(&conn, &entry.archive_id, &reactivation).is_err());
        assert!(ArchiveEntryRepository::find_open_by_student_tx(&conn, "S1").unwrap().is_none());

        assert!(conn
            .execute("DELETE FROM archive_entry WHERE archive_id = ?", params![entry.archive_id])
            .is_err());

        let repo = ArchiveEntryRepository::new(Arc::new(Mutex::new(conn)));
        let history = repo.find_by_student("S1").unwrap();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_reactivated());
        assert_eq!(history[0].archived_from, Some(Placement::new("G10", "A", 4)));
    }
}
