// ==========================================
// 学籍生命周期 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写管理
// 存储: config_kv 表 (key-value + scope)
// ==========================================

use crate::config::lifecycle_config_trait::{LifecycleConfigReader, RollNumbering};
use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 说明：为保证连接行为一致，会对传入连接再次应用统一 PRAGMA（幂等）。
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值（scope_id='global'）
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let result = conn.query_row(
            "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
            params![key],
            |row| row.get::<_, String>(0),
        );

        match result {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Box::new(e)),
        }
    }

    /// 读取 global scope 的配置值（公开方法，供其他模块复用）
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        self.get_config_value(key)
    }

    /// 从 config_kv 表读取配置值，带默认值
    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, Box<dyn Error>> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    /// 写入 global scope 配置（UPSERT）
    pub fn set_global(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value) VALUES ('global', ?1, ?2)
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::info!(config_key = key, value = value, "配置已更新");
        Ok(())
    }
}

// ==========================================
// LifecycleConfigReader Trait 实现
// ==========================================
impl LifecycleConfigReader for ConfigManager {
    fn get_attendance_threshold_pct(&self) -> Result<f64, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::ATTENDANCE_THRESHOLD_PCT, "75")?;
        match value.trim().parse::<f64>() {
            Ok(v) if (0.0..=100.0).contains(&v) => Ok(v),
            _ => {
                tracing::warn!(
                    config_key = config_keys::ATTENDANCE_THRESHOLD_PCT,
                    raw_value = %value,
                    "出勤阈值配置无效，使用默认值 75"
                );
                Ok(75.0)
            }
        }
    }

    fn get_default_operator(&self) -> Result<String, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::DEFAULT_OPERATOR, "system")?;
        let trimmed = value.trim();
        Ok(if trimmed.is_empty() { "system".to_string() } else { trimmed.to_string() })
    }

    fn get_notification_max_attempts(&self) -> Result<u32, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::NOTIFICATION_MAX_ATTEMPTS, "3")?;
        Ok(value.trim().parse::<u32>().ok().filter(|&n| n > 0).unwrap_or(3))
    }

    fn get_roll_numbering(&self) -> Result<RollNumbering, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::ROLL_NUMBERING, "APPEND")?;
        Ok(RollNumbering::parse(&value).unwrap_or(RollNumbering::Append))
    }

    /// 获取所有配置的快照（JSON格式，含默认值）
    ///
    /// # 用途
    /// - 批次执行审计中记录当时生效的配置
    fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        for (key, default) in config_keys::DEFAULTS {
            config_map.insert(key.to_string(), default.to_string());
        }

        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        let mut stmt =
            conn.prepare("SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 资格判定
    pub const ATTENDANCE_THRESHOLD_PCT: &str = "attendance_threshold_pct";

    // 审计
    pub const DEFAULT_OPERATOR: &str = "default_operator";

    // 通知
    pub const NOTIFICATION_MAX_ATTEMPTS: &str = "notification_max_attempts";

    // 编班
    pub const ROLL_NUMBERING: &str = "roll_numbering";

    /// 快照中补齐的默认值
    pub const DEFAULTS: [(&str, &str); 4] = [
        (ATTENDANCE_THRESHOLD_PCT, "75"),
        (DEFAULT_OPERATOR, "system"),
        (NOTIFICATION_MAX_ATTEMPTS, "3"),
        (ROLL_NUMBERING, "APPEND"),
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cfg = manager();
        assert_eq!(cfg.get_attendance_threshold_pct().unwrap(), 75.0);
        assert_eq!(cfg.get_default_operator().unwrap(), "system");
        assert_eq!(cfg.get_notification_max_attempts().unwrap(), 3);
        assert_eq!(cfg.get_roll_numbering().unwrap(), RollNumbering::Append);
    }

    #[test]
    fn test_set_global_and_snapshot() {
        let cfg = manager();
        cfg.set_global(config_keys::ROLL_NUMBERING, "preserve").unwrap();
        cfg.set_global(config_keys::ATTENDANCE_THRESHOLD_PCT, "80").unwrap();
        assert_eq!(cfg.get_roll_numbering().unwrap(), RollNumbering::Preserve);
        assert_eq!(cfg.get_attendance_threshold_pct().unwrap(), 80.0);

        let snapshot: serde_json::Value =
            serde_json::from_str(&cfg.get_config_snapshot().unwrap()).unwrap();
        assert_eq!(snapshot["attendance_threshold_pct"], "80");
        assert_eq!(snapshot["default_operator"], "system");
    }

    #[test]
    fn test_invalid_threshold_falls_back() {
        let cfg = manager();
        cfg.set_global(config_keys::ATTENDANCE_THRESHOLD_PCT, "180").unwrap();
        assert_eq!(cfg.get_attendance_threshold_pct().unwrap(), 75.0);
    }
}
