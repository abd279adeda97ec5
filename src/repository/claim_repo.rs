// ==========================================
// 学籍生命周期 - 记录占用仓储
// ==========================================
// 一个学生同一时刻只能被一个进行中的批次占用 (student_id 主键)
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{build_in_clause, now_ts};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::sync::{Arc, Mutex};

pub struct RecordClaimRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RecordClaimRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 查询学生当前占用批次
    pub fn find_claim(&self, student_id: &str) -> RepositoryResult<Option<String>> {
        let conn = self.get_conn()?;
        Self::find_claim_tx(&conn, student_id)
    }

    pub fn find_claim_tx(conn: &Connection, student_id: &str) -> RepositoryResult<Option<String>> {
        let batch_id = conn
            .query_row(
                "SELECT batch_id FROM record_claim WHERE student_id = ?",
                params![student_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(batch_id)
    }

    /// 返回已被占用的 (student_id, batch_id)
    pub fn find_claims_tx(
        conn: &Connection,
        student_ids: &[String],
    ) -> RepositoryResult<Vec<(String, String)>> {
        let sql = format!(
            "SELECT student_id, batch_id FROM record_claim WHERE {} ORDER BY student_id",
            build_in_clause("student_id", student_ids)
        );
        let mut stmt = conn.prepare(&sql)?;
        let claims = stmt
            .query_map(params_from_iter(student_ids.iter()), |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(claims)
    }

    pub fn insert_claims_tx(
        conn: &Connection,
        batch_id: &str,
        student_ids: &[String],
    ) -> RepositoryResult<usize> {
        let claimed_at = now_ts();
        let mut stmt = conn.prepare(
            "INSERT INTO record_claim (student_id, batch_id, claimed_at) VALUES (?, ?, ?)",
        )?;
        let mut count = 0;
        for student_id in student_ids {
            stmt.execute(params![student_id, batch_id, claimed_at])?;
            count += 1;
        }
        Ok(count)
    }

    pub fn release_by_batch_tx(conn: &Connection, batch_id: &str) -> RepositoryResult<usize> {
        let rows = conn.execute("DELETE FROM record_claim WHERE batch_id = ?", params![batch_id])?;
        Ok(rows)
    }
}
