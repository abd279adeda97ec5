// ==========================================
// 学籍生命周期 - 升级批次仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 并发: revision 乐观锁，UPDATE ... WHERE revision = ? 影响 0 行即冲突
// ==========================================

use crate::domain::batch::{BatchTarget, PromotionBatch};
use crate::domain::types::BatchStatus;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{fmt_ts, parse_enum, parse_opt_ts, parse_ts};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

// ==========================================
// PromotionBatchRepository - 升级批次仓储
// ==========================================
pub struct PromotionBatchRepository {
    conn: Arc<Mutex<Connection>>,
}

impl PromotionBatchRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_by_id(&self, batch_id: &str) -> RepositoryResult<Option<PromotionBatch>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, batch_id)
    }

    /// 源班级/学年的全部批次（新 → 旧）
    pub fn list_by_source(
        &self,
        source_class: &str,
        source_year: &str,
    ) -> RepositoryResult<Vec<PromotionBatch>> {
        let conn = self.get_conn()?;
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                r#"SELECT batch_id FROM promotion_batch
                   WHERE source_class = ? AND source_year = ?
                   ORDER BY created_at DESC, rowid DESC"#,
            )?;
            let rows = stmt.query_map(params![source_class, source_year], |row| row.get(0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };

        let mut batches = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(batch) = Self::find_by_id_tx(&conn, &id)? {
                batches.push(batch);
            }
        }
        Ok(batches)
    }

    // ==========================================
    // 事务内操作
    // ==========================================

    pub fn find_by_id_tx(conn: &Connection, batch_id: &str) -> RepositoryResult<Option<PromotionBatch>> {
        let batch = conn
            .query_row(
                r#"SELECT batch_id, source_class, source_year, target_class, target_year,
                          status, revision, owner, confirmed_projection, rejected_reason,
                          created_at, updated_at, executed_at
                   FROM promotion_batch WHERE batch_id = ?"#,
                params![batch_id],
                map_row,
            )
            .optional()?;

        let Some(mut batch) = batch else {
            return Ok(None);
        };

        let mut stmt = conn.prepare(
            "SELECT student_id FROM promotion_batch_member WHERE batch_id = ? ORDER BY seq_no",
        )?;
        batch.member_ids = stmt
            .query_map(params![batch_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(Some(batch))
    }

    /// 插入批次及其成员索引
    pub fn insert_tx(conn: &Connection, batch: &PromotionBatch) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO promotion_batch (
                batch_id, source_class, source_year, target_class, target_year,
                status, revision, owner, confirmed_projection, rejected_reason,
                created_at, updated_at, executed_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                batch.batch_id,
                batch.source_class,
                batch.source_year,
                batch.target.as_ref().map(|t| t.class_id.as_str()),
                batch.target.as_ref().map(|t| t.academic_year.as_str()),
                batch.status.as_str(),
                batch.revision,
                batch.owner,
                batch.confirmed_projection.map(|p| p as i64),
                batch.rejected_reason,
                fmt_ts(&batch.created_at),
                fmt_ts(&batch.updated_at),
                batch.executed_at.as_ref().map(fmt_ts),
            ],
        )?;

        let mut stmt = conn.prepare(
            "INSERT INTO promotion_batch_member (batch_id, student_id, seq_no) VALUES (?, ?, ?)",
        )?;
        for (seq, student_id) in batch.member_ids.iter().enumerate() {
            stmt.execute(params![batch.batch_id, student_id, seq as i64])?;
        }
        Ok(())
    }

    /// 带乐观锁更新批次头（成员集合不变）
    ///
    /// `batch.revision` 为调用方读到的版本；成功后返回新版本号
    ///
    /// # 错误
    /// - `RepositoryError::OptimisticLockFailure`: revision 不匹配
    /// - `RepositoryError::NotFound`: batch_id 不存在
    pub fn update_tx(conn: &Connection, batch: &PromotionBatch) -> RepositoryResult<i64> {
        let rows_affected = conn.execute(
            r#"UPDATE promotion_batch
               SET target_class = ?, target_year = ?, status = ?, owner = ?,
                   confirmed_projection = ?, rejected_reason = ?, updated_at = ?,
                   executed_at = ?, revision = revision + 1
               WHERE batch_id = ? AND revision = ?"#,
            params![
                batch.target.as_ref().map(|t| t.class_id.as_str()),
                batch.target.as_ref().map(|t| t.academic_year.as_str()),
                batch.status.as_str(),
                batch.owner,
                batch.confirmed_projection.map(|p| p as i64),
                batch.rejected_reason,
                fmt_ts(&batch.updated_at),
                batch.executed_at.as_ref().map(fmt_ts),
                batch.batch_id,
                batch.revision,
            ],
        )?;

        if rows_affected == 0 {
            // 判断是记录不存在还是revision冲突
            let actual: Option<i64> = conn
                .query_row(
                    "SELECT revision FROM promotion_batch WHERE batch_id = ?",
                    params![batch.batch_id],
                    |row| row.get(0),
                )
                .optional()?;

            return Err(match actual {
                Some(actual) => RepositoryError::OptimisticLockFailure {
                    entity_id: batch.batch_id.clone(),
                    expected: batch.revision,
                    actual,
                },
                None => RepositoryError::NotFound {
                    entity: "PromotionBatch".to_string(),
                    id: batch.batch_id.clone(),
                },
            });
        }

        Ok(batch.revision + 1)
    }
}

fn map_row(row: &Row) -> rusqlite::Result<PromotionBatch> {
    let target_class: Option<String> = row.get(3)?;
    let target_year: Option<String> = row.get(4)?;
    let status_raw: String = row.get(5)?;
    let created_raw: String = row.get(10)?;
    let updated_raw: String = row.get(11)?;

    Ok(PromotionBatch {
        batch_id: row.get(0)?,
        source_class: row.get(1)?,
        source_year: row.get(2)?,
        target: match (target_class, target_year) {
            (Some(class_id), Some(academic_year)) => Some(BatchTarget { class_id, academic_year }),
            _ => None,
        },
        status: parse_enum(5, &status_raw, BatchStatus::parse)?,
        revision: row.get(6)?,
        owner: row.get(7)?,
        confirmed_projection: row.get::<_, Option<i64>>(8)?.map(|p| p.max(0) as u32),
        rejected_reason: row.get(9)?,
        member_ids: Vec::new(),
        created_at: parse_ts(10, &created_raw)?,
        updated_at: parse_ts(11, &updated_raw)?,
        executed_at: parse_opt_ts(12, row.get(12)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    #[test]
    fn test_insert_preserves_member_order() {
        let conn = setup();
        let repo = PromotionBatchRepository::new(conn.clone());
        let batch = PromotionBatch::new_draft(
            "G5",
            "2025-2026",
            "op1",
            vec!["S3".to_string(), "S1".to_string(), "S2".to_string()],
        );
        PromotionBatchRepository::insert_tx(&conn.lock().unwrap(), &batch).unwrap();

        let found = repo.find_by_id(&batch.batch_id).unwrap().unwrap();
        assert_eq!(found.member_ids, vec!["S3", "S1", "S2"]);
        assert_eq!(found.status, BatchStatus::Draft);
        assert_eq!(found.revision, 1);
    }

    #[test]
    fn test_update_with_stale_revision_fails() {
        let conn = setup();
        let mut batch = PromotionBatch::new_draft("G5", "2025-2026", "op1", vec![]);
        let c = conn.lock().unwrap();
        PromotionBatchRepository::insert_tx(&c, &batch).unwrap();

        batch.status = BatchStatus::Confirmed;
        let new_rev = PromotionBatchRepository::update_tx(&c, &batch).unwrap();
        assert_eq!(new_rev, 2);

        // 仍持有旧版本号
        let err = PromotionBatchRepository::update_tx(&c, &batch).unwrap_err();
        match err {
            RepositoryError::OptimisticLockFailure { expected, actual, .. } => {
                assert_eq!(expected, 1);
                assert_eq!(actual, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_update_missing_batch_is_not_found() {
        let conn = setup();
        let batch = PromotionBatch::new_draft("G5", "2025-2026", "op1", vec![]);
        let err = PromotionBatchRepository::update_tx(&conn.lock().unwrap(), &batch).unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));
    }
}
