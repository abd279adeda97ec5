use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{params, Connection};

use crate::domain::action_log::ActionLog;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::fmt_ts;

// ==========================================
// ActionLogRepository - 审计日志仓储
// ==========================================
// 引擎在业务事务内调用 insert_tx；独立写入只给运维补录使用
pub struct ActionLogRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ActionLogRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    pub(super) fn get_conn(&self) -> RepositoryResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 独立写入一条审计
    pub fn insert(&self, log: &ActionLog) -> RepositoryResult<String> {
        let conn = self.get_conn()?;
        Self::insert_tx(&conn, log)
    }

    /// 事务内写入；log_seq 由表自增，决定同一时刻内的先后
    pub fn insert_tx(conn: &Connection, log: &ActionLog) -> RepositoryResult<String> {
        let payload = log.payload_json.as_ref().map(|v| v.to_string());
        conn.execute(
            "INSERT INTO action_log (action_id, action_type, action_ts, actor, entity_id, \
             reason, batch_id, payload_json, detail) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                &log.action_id,
                &log.action_type,
                fmt_ts(&log.action_ts),
                &log.actor,
                &log.entity_id,
                &log.reason,
                &log.batch_id,
                payload,
                &log.detail,
            ],
        )?;
        Ok(log.action_id.clone())
    }
}
