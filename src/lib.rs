// ==========================================
// 学籍管理后台 - 学籍生命周期核心库
// ==========================================
// 范围: 升级批次 / 例外升级 / 容量闸门 / 校友归档与恢复
// 技术栈: Rust + SQLite
// 系统定位: 人工确认 + 全量审计 (操作员最终控制权)
// ==========================================

// 初始化国际化系统
rust_i18n::i18n!("locales", fallback = "zh-CN");

// ==========================================
// 模块声明
// ==========================================

// 领域层 - 实体与类型
pub mod domain;

// 数据仓储层 - 数据访问
pub mod repository;

// 引擎层 - 业务规则
pub mod engine;

// 导入层 - 花名册外部数据
pub mod importer;

// 配置层 - 系统配置
pub mod config;

// 数据库基础设施（连接初始化/PRAGMA/建表统一）
pub mod db;

// 日志系统
pub mod logging;

// 性能统计
pub mod perf;

// 国际化
pub mod i18n;

// API 层 - 操作员命令
pub mod api;

// 应用层 - 状态装配与命令分发
pub mod app;

// ==========================================
// 重导出核心类型
// ==========================================

// 领域类型
pub use domain::types::{BatchStatus, ExamResult, ExitStatus, Reason};

// 领域实体
pub use domain::{
    ActionLog, ActionType, ArchiveEntry, ClassCapacity, LifecycleStatus, OverrideRecord,
    Placement, PromotionBatch, Reactivation, SeatLimit, StudentLifecycleRecord,
};

// 引擎
pub use engine::{
    ArchiveRegistry, CapacityGuard, CapacityVerdict, EligibilityEvaluator, LifecycleError,
    LifecycleResult, NotificationDispatcher, OverrideManager, PromotionBatchExecutor,
};

// API
pub use api::{ApiError, ApiResult, LifecycleApi, OperatorCommand};

// ==========================================
// 常量定义
// ==========================================

// 系统版本
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// 系统名称
pub const APP_NAME: &str = "学籍生命周期管理";

// 数据库版本
pub const DB_VERSION: &str = "v0.1";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
