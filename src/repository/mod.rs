// ==========================================
// 学籍生命周期 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口,屏蔽数据库细节
// 约束: 所有查询使用参数化,防止 SQL 注入
// 约定: `*_tx(&Connection, ..)` 关联函数供引擎在同一事务内组合
// ==========================================

pub mod action_log_repo;
pub mod archive_repo;
pub mod batch_repo;
pub mod claim_repo;
pub mod error;
pub mod fee_repo;
pub mod outbox_repo;
pub mod override_repo;
pub mod roster_directory_repo;
pub mod row_utils;
pub mod snapshot_repo;
pub mod student_repo;

// 重导出核心仓储
pub use action_log_repo::ActionLogRepository;
pub use archive_repo::ArchiveEntryRepository;
pub use batch_repo::PromotionBatchRepository;
pub use claim_repo::RecordClaimRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use fee_repo::FeeLedgerRepository;
pub use outbox_repo::NotificationOutboxRepository;
pub use override_repo::OverrideRecordRepository;
pub use roster_directory_repo::RosterDirectoryRepository;
pub use snapshot_repo::AcademicSnapshotRepository;
pub use student_repo::StudentLifecycleRepository;
