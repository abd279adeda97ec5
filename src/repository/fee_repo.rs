// ==========================================
// 学籍生命周期 - 内置收费分配仓储
// ==========================================
// 外部收费服务的 SQLite 实现；撤销只改状态不删行
// ==========================================

use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::now_ts;
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

pub struct FeeLedgerRepository {
    conn: Arc<Mutex<Connection>>,
}

impl FeeLedgerRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 为学生分配新学年收费结构，返回 assignment_id
    pub fn assign(&self, student_id: &str, academic_year: &str) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        let assignment_id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            r#"INSERT INTO fee_assignment (assignment_id, student_id, academic_year, status, created_at)
               VALUES (?, ?, ?, 'ASSIGNED', ?)"#,
            params![assignment_id, student_id, academic_year, now_ts()],
        )?;
        Ok(assignment_id)
    }

    pub fn revoke(&self, assignment_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        let rows = conn.execute(
            r#"UPDATE fee_assignment SET status = 'REVOKED', revoked_at = ?
               WHERE assignment_id = ? AND status = 'ASSIGNED'"#,
            params![now_ts(), assignment_id],
        )?;
        if rows == 0 {
            return Err(RepositoryError::NotFound {
                entity: "FeeAssignment".to_string(),
                id: assignment_id.to_string(),
            });
        }
        Ok(())
    }

    /// 有效（未撤销）分配数
    pub fn count_active(&self, student_id: &str, academic_year: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n = conn.query_row(
            r#"SELECT COUNT(*) FROM fee_assignment
               WHERE student_id = ? AND academic_year = ? AND status = 'ASSIGNED'"#,
            params![student_id, academic_year],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}
