// ==========================================
// 学籍生命周期 - 引擎层仓储聚合
// ==========================================
// 职责: 聚合引擎所需的所有 Repository 与共享连接
// ==========================================

use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::engine::error::{LifecycleError, LifecycleResult};
use crate::repository::{
    AcademicSnapshotRepository, ActionLogRepository, ArchiveEntryRepository,
    NotificationOutboxRepository, OverrideRecordRepository, PromotionBatchRepository,
    RecordClaimRepository, RepositoryError, StudentLifecycleRepository,
};

/// 学籍生命周期仓储集合
///
/// 多表写入由引擎通过 `lock()` 取得连接后在一个事务内组合各仓储的 `*_tx` 函数完成；
/// 只读查询直接使用各仓储实例。
#[derive(Clone)]
pub struct LifecycleRepositories {
    conn: Arc<Mutex<Connection>>,
    pub student_repo: Arc<StudentLifecycleRepository>,
    pub override_repo: Arc<OverrideRecordRepository>,
    pub batch_repo: Arc<PromotionBatchRepository>,
    pub claim_repo: Arc<RecordClaimRepository>,
    pub archive_repo: Arc<ArchiveEntryRepository>,
    pub snapshot_repo: Arc<AcademicSnapshotRepository>,
    pub outbox_repo: Arc<NotificationOutboxRepository>,
    pub action_log_repo: Arc<ActionLogRepository>,
}

impl LifecycleRepositories {
    /// 基于同一连接创建全部仓储
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            student_repo: Arc::new(StudentLifecycleRepository::new(conn.clone())),
            override_repo: Arc::new(OverrideRecordRepository::new(conn.clone())),
            batch_repo: Arc::new(PromotionBatchRepository::new(conn.clone())),
            claim_repo: Arc::new(RecordClaimRepository::new(conn.clone())),
            archive_repo: Arc::new(ArchiveEntryRepository::new(conn.clone())),
            snapshot_repo: Arc::new(AcademicSnapshotRepository::new(conn.clone())),
            outbox_repo: Arc::new(NotificationOutboxRepository::new(conn.clone())),
            action_log_repo: Arc::new(ActionLogRepository::new(conn.clone())),
            conn,
        }
    }

    /// 获取共享连接（调用方负责在释放前完成事务）
    pub fn lock(&self) -> LifecycleResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LifecycleError::Repository(RepositoryError::LockError(e.to_string())))
    }
}
