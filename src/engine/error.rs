// ==========================================
// 学籍生命周期 - 引擎层错误类型
// ==========================================
// 工具: thiserror 派生宏
// 约定: 每个错误都携带出错实体与原因，不允许静默部分成功
// ==========================================

use crate::repository::error::RepositoryError;
use thiserror::Error;

/// 本地校验失败（发生在任何状态变更之前）
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    #[error("原因不能为空")]
    EmptyReason,

    #[error("人数不一致: 期望 {expected}, 实际 {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("出勤率超出范围 (student_id={student_id}): {value}")]
    AttendanceOutOfRange { student_id: String, value: f64 },

    #[error("批次未设置目标班级/学年")]
    MissingTarget,

    #[error("字段不能为空: {0}")]
    BlankField(&'static str),

    #[error("学号必须为正整数")]
    InvalidRoll,
}

/// 引擎层错误类型
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("校验失败: {0}")]
    Validation(#[from] ValidationFailure),

    #[error("状态不允许 (entity={entity_id}): {message}")]
    InvalidState { entity_id: String, message: String },

    #[error("容量不足: class={class_id}, projected={projected}, capacity={capacity}")]
    CapacityExceeded {
        class_id: String,
        projected: u32,
        capacity: u32,
    },

    #[error("并发冲突 (entity={entity_id}): {message}")]
    Conflict { entity_id: String, message: String },

    #[error("批次执行失败，已全部回滚: failed={failed_student_ids:?}, reason={reason}")]
    BatchExecution {
        failed_student_ids: Vec<String>,
        reason: String,
    },

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    #[error("批次已执行: {batch_id}")]
    AlreadyExecuted { batch_id: String },

    #[error("配置读取失败: {0}")]
    Config(String),

    #[error("外部服务调用失败 ({service}): {message}")]
    Collaborator { service: &'static str, message: String },

    #[error("仓储错误: {0}")]
    Repository(RepositoryError),
}

impl LifecycleError {
    pub fn invalid_state(entity_id: &str, message: impl Into<String>) -> Self {
        LifecycleError::InvalidState {
            entity_id: entity_id.to_string(),
            message: message.into(),
        }
    }

    pub fn conflict(entity_id: &str, message: impl Into<String>) -> Self {
        LifecycleError::Conflict {
            entity_id: entity_id.to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(entity: &str, id: &str) -> Self {
        LifecycleError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }
}

// 乐观锁失败 → Conflict；缺失行 → NotFound；其余保持仓储错误
impl From<RepositoryError> for LifecycleError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure {
                entity_id,
                expected,
                actual,
            } => LifecycleError::Conflict {
                entity_id,
                message: format!("revision 已变化: expected={}, actual={}", expected, actual),
            },
            RepositoryError::NotFound { entity, id } => LifecycleError::NotFound { entity, id },
            other => LifecycleError::Repository(other),
        }
    }
}

// 事务开启 / 提交失败沿用仓储层的分类
impl From<rusqlite::Error> for LifecycleError {
    fn from(err: rusqlite::Error) -> Self {
        RepositoryError::from(err).into()
    }
}

/// Result 类型别名
pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimistic_lock_maps_to_conflict() {
        let err: LifecycleError = RepositoryError::OptimisticLockFailure {
            entity_id: "B1".to_string(),
            expected: 2,
            actual: 3,
        }
        .into();
        match err {
            LifecycleError::Conflict { entity_id, message } => {
                assert_eq!(entity_id, "B1");
                assert!(message.contains("expected=2"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_sqlite_error_follows_repository_mapping() {
        let err: LifecycleError = rusqlite::Error::QueryReturnedNoRows.into();
        assert!(matches!(err, LifecycleError::NotFound { .. }));

        let err: LifecycleError = rusqlite::Error::InvalidColumnName("revision".to_string()).into();
        assert!(matches!(
            err,
            LifecycleError::Repository(RepositoryError::DatabaseQueryError(_))
        ));
    }

    #[test]
    fn test_validation_from_failure() {
        let err: LifecycleError = ValidationFailure::EmptyReason.into();
        assert!(matches!(err, LifecycleError::Validation(ValidationFailure::EmptyReason)));
    }
}
