// ==========================================
// 学籍生命周期 - 引擎层
// ==========================================
// 职责: 实现业务规则，组合仓储事务，不直接拼业务 SQL
// 红线: 所有判定必须输出 reason；所有状态变更必须写审计
// ==========================================

pub mod archive_registry;
pub(crate) mod batch_guard;
pub mod capacity_guard;
pub mod collaborators;
pub mod eligibility;
pub mod error;
pub mod notification_dispatcher;
pub mod override_manager;
pub mod promotion_executor;
pub mod repositories;

// 重导出核心引擎
pub use archive_registry::ArchiveRegistry;
pub use capacity_guard::{CapacityGuard, CapacityVerdict};
pub use collaborators::{
    CapacityService, CollaboratorResult, Collaborators, FeeService, LoggingNotificationService,
    NotificationService, RosterService,
};
pub use eligibility::{Eligibility, EligibilityEvaluator};
pub use error::{LifecycleError, LifecycleResult, ValidationFailure};
pub use notification_dispatcher::{DispatchReport, NotificationDispatcher};
pub use override_manager::{OverrideManager, OverrideOutcome};
pub use promotion_executor::{BatchView, ExecutionReport, PromotionBatchExecutor};
pub use repositories::LifecycleRepositories;
