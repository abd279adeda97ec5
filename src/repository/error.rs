// ==========================================
// 学籍生命周期 - 仓储层错误类型
// ==========================================
// 表级红线由触发器兜底（只追加 / 不可删除 / 不可修改），
// 触发器拒绝的写入统一映射为 AppendOnlyViolation
// ==========================================

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("乐观锁冲突: entity_id={entity_id}, expected_revision={expected}, actual_revision={actual}")]
    OptimisticLockFailure {
        entity_id: String,
        expected: i64,
        actual: i64,
    },

    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },

    #[error("数据库锁获取失败: {0}")]
    LockError(String),

    /// 审计 / 归档 / 例外升级表拒绝修改或删除
    #[error("只追加记录不可修改: {0}")]
    AppendOnlyViolation(String),

    /// CHECK / UNIQUE 约束（状态与选中标记组合非法、重复主键等）
    #[error("数据完整性约束拒绝写入: {0}")]
    IntegrityViolation(String),

    #[error("数据库查询失败: {0}")]
    DatabaseQueryError(String),

    #[error("字段值错误 (field={field}): {message}")]
    FieldValueError { field: String, message: String },

    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<rusqlite::Error> for RepositoryError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::SqliteFailure(_, Some(msg)) => classify_sqlite_message(msg),
            rusqlite::Error::QueryReturnedNoRows => RepositoryError::NotFound {
                entity: "Unknown".to_string(),
                id: "Unknown".to_string(),
            },
            _ => RepositoryError::DatabaseQueryError(err.to_string()),
        }
    }
}

fn classify_sqlite_message(msg: String) -> RepositoryError {
    const TRIGGER_MARKERS: [&str; 3] = ["immutable", "append-only", "never deleted"];
    if TRIGGER_MARKERS.iter().any(|m| msg.contains(m)) {
        RepositoryError::AppendOnlyViolation(msg)
    } else if msg.contains("CHECK") || msg.contains("UNIQUE") || msg.contains("FOREIGN KEY") {
        RepositoryError::IntegrityViolation(msg)
    } else {
        RepositoryError::DatabaseQueryError(msg)
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_trigger_and_constraint_messages() {
        assert!(matches!(
            classify_sqlite_message("action_log is append-only".to_string()),
            RepositoryError::AppendOnlyViolation(_)
        ));
        assert!(matches!(
            classify_sqlite_message("CHECK constraint failed: student_lifecycle".to_string()),
            RepositoryError::IntegrityViolation(_)
        ));
        assert!(matches!(
            classify_sqlite_message("disk I/O error".to_string()),
            RepositoryError::DatabaseQueryError(_)
        ));
    }
}
