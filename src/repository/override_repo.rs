// ==========================================
// 学籍生命周期 - 例外升级记录仓储
// ==========================================
// 红线: 只插入、只查询；表上触发器拒绝 UPDATE/DELETE
// ==========================================

use crate::domain::override_record::OverrideRecord;
use crate::domain::types::Reason;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{conversion_err, fmt_ts, parse_ts};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

pub struct OverrideRecordRepository {
    conn: Arc<Mutex<Connection>>,
}

impl OverrideRecordRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert_tx(conn: &Connection, record: &OverrideRecord) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO override_record (
                override_id, student_id, batch_id, reason, approved_by, created_at
            ) VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                record.override_id,
                record.student_id,
                record.batch_id,
                record.reason.as_str(),
                record.approved_by,
                fmt_ts(&record.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn find_by_id(&self, override_id: &str) -> RepositoryResult<Option<OverrideRecord>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, override_id)
    }

    pub fn find_by_id_tx(conn: &Connection, override_id: &str) -> RepositoryResult<Option<OverrideRecord>> {
        let record = conn
            .query_row(
                r#"SELECT override_id, student_id, batch_id, reason, approved_by, created_at
                   FROM override_record WHERE override_id = ?"#,
                params![override_id],
                map_row,
            )
            .optional()?;
        Ok(record)
    }

    /// 学生的全部例外升级历史（含已撤销）
    pub fn find_by_student(&self, student_id: &str) -> RepositoryResult<Vec<OverrideRecord>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT override_id, student_id, batch_id, reason, approved_by, created_at
               FROM override_record WHERE student_id = ?
               ORDER BY created_at, rowid"#,
        )?;
        let records = stmt
            .query_map(params![student_id], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }
}

fn map_row(row: &Row) -> rusqlite::Result<OverrideRecord> {
    let reason_raw: String = row.get(3)?;
    let created_raw: String = row.get(5)?;
    Ok(OverrideRecord {
        override_id: row.get(0)?,
        student_id: row.get(1)?,
        batch_id: row.get(2)?,
        reason: Reason::new(&reason_raw).ok_or_else(|| conversion_err(3, "blank reason".to_string()))?,
        approved_by: row.get(4)?,
        created_at: parse_ts(5, &created_raw)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_override_record_is_immutable() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let ov = OverrideRecord::new("S5", None, Reason::new("Medical exemption").unwrap(), "principal");
        OverrideRecordRepository::insert_tx(&conn, &ov).unwrap();

        assert!(conn
            .execute("UPDATE override_record SET reason = 'x' WHERE override_id = ?", params![ov.override_id])
            .is_err());
        assert!(conn
            .execute("DELETE FROM override_record WHERE override_id = ?", params![ov.override_id])
            .is_err());

        let repo = OverrideRecordRepository::new(Arc::new(Mutex::new(conn)));
        let history = repo.find_by_student("S5").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].reason.as_str(), "Medical exemption");
    }
}
