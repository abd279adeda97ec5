// ==========================================
// 学籍生命周期 - API层
// ==========================================
// 职责: 操作员命令入口，校验入参并把引擎错误转换为稳定错误码
// 红线: 不含业务规则
// ==========================================

pub mod commands;
pub mod error;
pub mod lifecycle_api;

// 重导出
pub use commands::OperatorCommand;
pub use error::{ApiError, ApiResult};
pub use lifecycle_api::{LifecycleApi, StudentProfile, DEFAULT_AUDIT_LIMIT, DEFAULT_DISPATCH_LIMIT};
