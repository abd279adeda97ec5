// ==========================================
// 学籍生命周期 - 通知发件箱仓储
// ==========================================

use crate::domain::notification::{NotificationKind, OutboxMessage, OutboxStatus};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{conversion_err, fmt_ts, now_ts, parse_enum, parse_opt_ts, parse_ts};
use rusqlite::{params, Connection, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT notification_id, kind, student_id, guardian_contact, payload_json,
           status, attempts, last_error, created_at, sent_at
    FROM notification_outbox
"#;

pub struct NotificationOutboxRepository {
    conn: Arc<Mutex<Connection>>,
}

impl NotificationOutboxRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    /// 入队（在提交事务内调用）
    pub fn enqueue_tx(conn: &Connection, message: &OutboxMessage) -> RepositoryResult<()> {
        conn.execute(
            r#"INSERT INTO notification_outbox (
                notification_id, kind, student_id, guardian_contact, payload_json,
                status, attempts, last_error, created_at, sent_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                message.notification_id,
                message.kind.as_str(),
                message.student_id,
                message.guardian_contact,
                message.payload_json.to_string(),
                message.status.as_str(),
                message.attempts as i64,
                message.last_error,
                fmt_ts(&message.created_at),
                message.sent_at.as_ref().map(fmt_ts),
            ],
        )?;
        Ok(())
    }

    /// 待投递消息（先进先出）
    pub fn list_pending(&self, limit: usize) -> RepositoryResult<Vec<OutboxMessage>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "{} WHERE status = 'PENDING' ORDER BY created_at, rowid LIMIT ?",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params![limit as i64], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    pub fn list_by_student(&self, student_id: &str) -> RepositoryResult<Vec<OutboxMessage>> {
        let conn = self.get_conn()?;
        let sql = format!("{} WHERE student_id = ? ORDER BY created_at, rowid", SELECT_COLUMNS);
        let mut stmt = conn.prepare(&sql)?;
        let messages = stmt
            .query_map(params![student_id], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    pub fn count_by_status(&self, status: OutboxStatus) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM notification_outbox WHERE status = ?",
            params![status.as_str()],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    pub fn mark_sent(&self, notification_id: &str) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"UPDATE notification_outbox
               SET status = 'SENT', attempts = attempts + 1, last_error = NULL, sent_at = ?
               WHERE notification_id = ?"#,
            params![now_ts(), notification_id],
        )?;
        Ok(())
    }

    /// 记录一次投递失败；达到上限后置为 PARKED
    pub fn record_failure(
        &self,
        notification_id: &str,
        error: &str,
        max_attempts: u32,
    ) -> RepositoryResult<OutboxStatus> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"UPDATE notification_outbox
               SET attempts = attempts + 1,
                   last_error = ?,
                   status = CASE WHEN attempts + 1 >= ? THEN 'PARKED' ELSE 'PENDING' END
               WHERE notification_id = ?"#,
            params![error, max_attempts as i64, notification_id],
        )?;
        let raw: String = conn.query_row(
            "SELECT status FROM notification_outbox WHERE notification_id = ?",
            params![notification_id],
            |row| row.get(0),
        )?;
        OutboxStatus::parse(&raw).ok_or_else(|| RepositoryError::FieldValueError {
            field: "status".to_string(),
            message: raw,
        })
    }
}

fn map_row(row: &Row) -> rusqlite::Result<OutboxMessage> {
    let kind_raw: String = row.get(1)?;
    let payload_raw: String = row.get(4)?;
    let status_raw: String = row.get(5)?;
    let created_raw: String = row.get(8)?;
    Ok(OutboxMessage {
        notification_id: row.get(0)?,
        kind: parse_enum(1, &kind_raw, NotificationKind::parse)?,
        student_id: row.get(2)?,
        guardian_contact: row.get(3)?,
        payload_json: serde_json::from_str(&payload_raw)
            .map_err(|e| conversion_err(4, e.to_string()))?,
        status: parse_enum(5, &status_raw, OutboxStatus::parse)?,
        attempts: row.get::<_, i64>(6)?.max(0) as u32,
        last_error: row.get(7)?,
        created_at: parse_ts(8, &created_raw)?,
        sent_at: parse_opt_ts(9, row.get(9)?)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_parks_after_max_attempts() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let msg = OutboxMessage::pending(
            NotificationKind::PromotionNotice,
            "S1",
            Some("parent@example.org".to_string()),
            serde_json::json!({ "class_id": "G6" }),
        );
        NotificationOutboxRepository::enqueue_tx(&conn, &msg).unwrap();
        let repo = NotificationOutboxRepository::new(Arc::new(Mutex::new(conn)));

        assert_eq!(repo.record_failure(&msg.notification_id, "smtp down", 2).unwrap(), OutboxStatus::Pending);
        assert_eq!(repo.record_failure(&msg.notification_id, "smtp down", 2).unwrap(), OutboxStatus::Parked);
        assert!(repo.list_pending(10).unwrap().is_empty());

        let stored = &repo.list_by_student("S1").unwrap()[0];
        assert_eq!(stored.attempts, 2);
        assert_eq!(stored.last_error.as_deref(), Some("smtp down"));
    }
}
