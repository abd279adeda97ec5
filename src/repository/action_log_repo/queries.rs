use super::core::ActionLogRepository;
use crate::domain::action_log::ActionLog;
use crate::repository::error::RepositoryResult;
use crate::repository::row_utils::parse_ts;
use rusqlite::{params, Result as SqliteResult, Row};

const SELECT_COLUMNS: &str = r#"
    SELECT action_id, action_type, action_ts, actor, entity_id,
           reason, batch_id, payload_json, detail
    FROM action_log
"#;

impl ActionLogRepository {
    // ==========================================
    // 查询操作
    // ==========================================

    /// 按 action_id 查询单个日志
    pub fn find_by_id(&self, action_id: &str) -> RepositoryResult<Option<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE action_id = ?", SELECT_COLUMNS);

        match conn.query_row(&sql, params![action_id], |row| self.map_row(row)) {
            Ok(log) => Ok(Some(log)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// 按实体（学生ID/批次ID）查询，按写入顺序
    pub fn find_by_entity(&self, entity_id: &str) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE entity_id = ? ORDER BY log_seq", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;

        let logs = stmt
            .query_map(params![entity_id], |row| self.map_row(row))?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(logs)
    }

    /// 按批次查询，按写入顺序
    pub fn find_by_batch(&self, batch_id: &str) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE batch_id = ? ORDER BY log_seq", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;

        let logs = stmt
            .query_map(params![batch_id], |row| self.map_row(row))?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(logs)
    }

    /// 查询指定操作人的最近日志
    pub fn find_by_actor(&self, actor: &str, limit: i32) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE actor = ? ORDER BY log_seq DESC LIMIT ?", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;

        let logs = stmt
            .query_map(params![actor, limit], |row| self.map_row(row))?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(logs)
    }

    /// 查询指定操作类型的最近日志
    pub fn find_by_action_type(
        &self,
        action_type: &str,
        limit: i32,
    ) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE action_type = ? ORDER BY log_seq DESC LIMIT ?",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;

        let logs = stmt
            .query_map(params![action_type, limit], |row| self.map_row(row))?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(logs)
    }

    /// 查询最近 N 条日志（新 → 旧）
    pub fn find_recent(&self, limit: i32) -> RepositoryResult<Vec<ActionLog>> {
        let conn = self.get_conn()?;
        let sql = format!("{} ORDER BY log_seq DESC LIMIT ?", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;

        let logs = stmt
            .query_map(params![limit], |row| self.map_row(row))?
            .collect::<SqliteResult<Vec<_>>>()?;

        Ok(logs)
    }

    /// 统计指定实体指定类型的日志条数
    pub fn count_for_entity(&self, entity_id: &str, action_type: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM action_log WHERE entity_id = ? AND action_type = ?",
            params![entity_id, action_type],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    // ==========================================
    // 辅助方法
    // ==========================================

    fn map_row(&self, row: &Row) -> SqliteResult<ActionLog> {
        let action_ts_str: String = row.get(2)?;
        let payload_json_str: Option<String> = row.get(7)?;

        Ok(ActionLog {
            action_id: row.get(0)?,
            action_type: row.get(1)?,
            action_ts: parse_ts(2, &action_ts_str)?,
            actor: row.get(3)?,
            entity_id: row.get(4)?,
            reason: row.get(5)?,
            batch_id: row.get(6)?,
            // 解析 JSON 字段（脏数据按缺失处理）
            payload_json: payload_json_str.and_then(|s| serde_json::from_str(&s).ok()),
            detail: row.get(8)?,
        })
    }
}
