// ==========================================
// 学籍生命周期 - 应用状态
// ==========================================
// 职责: 打开数据库、建表、装配协作方与 API 实例
// ==========================================

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::api::LifecycleApi;
use crate::config::ConfigManager;
use crate::engine::{Collaborators, LoggingNotificationService};
use crate::repository::{FeeLedgerRepository, RosterDirectoryRepository};

/// 应用状态
///
/// 所有仓储、引擎共享同一个 SQLite 连接
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 操作员 API
    pub api: Arc<LifecycleApi>,

    /// 配置管理器
    pub config: Arc<ConfigManager>,

    conn: Arc<Mutex<Connection>>,
}

impl AppState {
    /// 使用内置的花名册/容量/收费适配与日志通知创建应用状态
    pub fn new(db_path: String) -> Result<Self, String> {
        let conn = open_shared_connection(&db_path)?;
        let roster = Arc::new(RosterDirectoryRepository::new(conn.clone()));
        let collaborators = Collaborators {
            roster: roster.clone(),
            capacity: roster,
            fees: Arc::new(FeeLedgerRepository::new(conn.clone())),
            notifier: Arc::new(LoggingNotificationService),
        };
        Self::assemble(db_path, conn, collaborators)
    }

    /// 使用外部协作方实现创建应用状态
    pub fn with_collaborators(db_path: String, collaborators: Collaborators) -> Result<Self, String> {
        let conn = open_shared_connection(&db_path)?;
        Self::assemble(db_path, conn, collaborators)
    }

    fn assemble(
        db_path: String,
        conn: Arc<Mutex<Connection>>,
        collaborators: Collaborators,
    ) -> Result<Self, String> {
        let config = Arc::new(
            ConfigManager::from_connection(conn.clone())
                .map_err(|e| format!("无法创建ConfigManager: {}", e))?,
        );
        let api = Arc::new(LifecycleApi::new(conn.clone(), collaborators, config.clone()));

        tracing::info!(db_path = %db_path, "AppState 初始化完成");
        Ok(Self {
            db_path,
            api,
            config,
            conn,
        })
    }

    /// 共享连接（种子工具与测试使用）
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        self.conn.clone()
    }
}

fn open_shared_connection(db_path: &str) -> Result<Arc<Mutex<Connection>>, String> {
    tracing::info!("初始化AppState，数据库路径: {}", db_path);

    let mut conn = crate::db::open_sqlite_connection(db_path)
        .map_err(|e| format!("无法打开数据库: {}", e))?;
    crate::perf::install_sqlite_tracing(&mut conn);
    crate::db::init_schema(&conn).map_err(|e| format!("建表失败: {}", e))?;

    Ok(Arc::new(Mutex::new(conn)))
}

/// 获取默认数据库路径
///
/// 优先级: 环境变量 STUDENT_LIFECYCLE_DB_PATH > 用户数据目录 > 当前目录
pub fn get_default_db_path() -> String {
    if let Ok(path) = std::env::var("STUDENT_LIFECYCLE_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./student_lifecycle.db");

    if let Some(data_dir) = dirs::data_dir() {
        let dir = data_dir.join("student-lifecycle");
        // 目录创建失败时退回当前目录
        if std::fs::create_dir_all(&dir).is_ok() {
            path = dir.join("student_lifecycle.db");
        }
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_default_db_path() {
        let path = get_default_db_path();
        assert!(!path.is_empty());
        assert!(path.ends_with(".db"));
    }
}
