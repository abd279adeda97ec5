// ==========================================
// 学籍生命周期 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型、状态不变量
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod action_log;
pub mod archive;
pub mod batch;
pub mod capacity;
pub mod notification;
pub mod override_record;
pub mod roster;
pub mod snapshot;
pub mod student;
pub mod types;

// 重导出核心类型
pub use action_log::{ActionLog, ActionType};
pub use archive::{ArchiveEntry, Reactivation};
pub use batch::{BatchTarget, PromotionBatch};
pub use capacity::{ClassCapacity, SeatLimit};
pub use notification::{NotificationKind, OutboxMessage, OutboxStatus};
pub use override_record::OverrideRecord;
pub use roster::CohortMember;
pub use snapshot::AcademicSnapshot;
pub use student::{
    LifecycleStatus, OverrideGrant, PerformanceInputs, Placement, SelectionRejected,
    StudentLifecycleRecord,
};
pub use types::{BatchStatus, ExamResult, ExitStatus, Reason};
