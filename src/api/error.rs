// ==========================================
// 学籍生命周期 - API层错误类型
// ==========================================
// 职责: 把引擎/仓储/导入错误转换为操作员可读的错误
// 约定: 每个变体对应稳定错误码，并携带出错实体与原因
// ==========================================

use serde_json::{json, Value as JsonValue};
use thiserror::Error;

use crate::engine::error::{LifecycleError, ValidationFailure};
use crate::i18n::t_with_args;
use crate::importer::ImportError;
use crate::repository::error::RepositoryError;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 输入与状态
    // ==========================================
    #[error("校验失败: {message}")]
    ValidationError {
        message: String,
        field: Option<String>,
        row: Option<usize>,
    },

    #[error("状态不允许 (entity={entity_id}): {message}")]
    InvalidState { entity_id: String, message: String },

    #[error("资源未找到: {entity}(id={id})")]
    NotFound { entity: String, id: String },

    // ==========================================
    // 升级批次
    // ==========================================
    #[error("容量不足: class={class_id}, projected={projected}, capacity={capacity}")]
    CapacityExceeded {
        class_id: String,
        projected: u32,
        capacity: u32,
    },

    #[error("批次执行失败: failed={failed_student_ids:?}, reason={reason}")]
    BatchExecutionError {
        failed_student_ids: Vec<String>,
        reason: String,
    },

    #[error("批次已执行: {batch_id}")]
    AlreadyExecuted { batch_id: String },

    // ==========================================
    // 并发控制
    // ==========================================
    #[error("并发冲突 (entity={entity_id}): {message}")]
    Conflict { entity_id: String, message: String },

    // ==========================================
    // 数据访问 / 通用
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn validation(message: impl Into<String>) -> Self {
        ApiError::ValidationError {
            message: message.into(),
            field: None,
            row: None,
        }
    }

    /// 稳定错误码
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::ValidationError { .. } => "VALIDATION_ERROR",
            ApiError::InvalidState { .. } => "INVALID_STATE",
            ApiError::NotFound { .. } => "NOT_FOUND",
            ApiError::CapacityExceeded { .. } => "CAPACITY_EXCEEDED",
            ApiError::BatchExecutionError { .. } => "BATCH_EXECUTION_ERROR",
            ApiError::AlreadyExecuted { .. } => "ALREADY_EXECUTED",
            ApiError::Conflict { .. } => "CONFLICT",
            ApiError::DatabaseError(_) => "DATABASE_ERROR",
            ApiError::InternalError(_) | ApiError::Other(_) => "INTERNAL_ERROR",
        }
    }

    /// 当前语言下的提示文本
    pub fn localized_message(&self) -> String {
        match self {
            ApiError::ValidationError {
                message,
                row: Some(_),
                ..
            } => t_with_args("error.import", &[("detail", message.as_str())]),
            ApiError::ValidationError { message, .. } => {
                t_with_args("error.validation", &[("detail", message.as_str())])
            }
            ApiError::InvalidState { entity_id, message } => t_with_args(
                "error.invalid_state",
                &[("detail", format!("{} ({})", message, entity_id).as_str())],
            ),
            ApiError::NotFound { entity, id } => {
                t_with_args("error.not_found", &[("detail", format!("{} {}", entity, id).as_str())])
            }
            ApiError::CapacityExceeded {
                class_id,
                projected,
                capacity,
            } => t_with_args(
                "error.capacity_exceeded",
                &[
                    ("class_id", class_id.as_str()),
                    ("projected", projected.to_string().as_str()),
                    ("capacity", capacity.to_string().as_str()),
                ],
            ),
            ApiError::BatchExecutionError {
                failed_student_ids, ..
            } => t_with_args(
                "error.batch_execution",
                &[("students", failed_student_ids.join(", ").as_str())],
            ),
            ApiError::AlreadyExecuted { batch_id } => {
                t_with_args("error.already_executed", &[("batch_id", batch_id.as_str())])
            }
            ApiError::Conflict { entity_id, message } => t_with_args(
                "error.conflict",
                &[("detail", format!("{} ({})", message, entity_id).as_str())],
            ),
            ApiError::DatabaseError(msg) => t_with_args("error.database", &[("detail", msg.as_str())]),
            ApiError::InternalError(msg) => t_with_args("error.internal", &[("detail", msg.as_str())]),
            ApiError::Other(err) => t_with_args("error.internal", &[("detail", err.to_string().as_str())]),
        }
    }

    /// 结构化详情（出错实体 + 原因）
    pub fn details(&self) -> JsonValue {
        match self {
            ApiError::ValidationError { message, field, row } => {
                json!({ "reason": message, "field": field, "row": row })
            }
            ApiError::InvalidState { entity_id, message } | ApiError::Conflict { entity_id, message } => {
                json!({ "entity_id": entity_id, "reason": message })
            }
            ApiError::NotFound { entity, id } => json!({ "entity": entity, "id": id }),
            ApiError::CapacityExceeded {
                class_id,
                projected,
                capacity,
            } => json!({ "class_id": class_id, "projected": projected, "capacity": capacity }),
            ApiError::BatchExecutionError {
                failed_student_ids,
                reason,
            } => json!({ "failed_student_ids": failed_student_ids, "reason": reason }),
            ApiError::AlreadyExecuted { batch_id } => json!({ "batch_id": batch_id }),
            ApiError::DatabaseError(msg) | ApiError::InternalError(msg) => json!({ "reason": msg }),
            ApiError::Other(err) => json!({ "reason": err.to_string() }),
        }
    }
}

// ==========================================
// 从 LifecycleError 转换
// ==========================================
impl From<LifecycleError> for ApiError {
    fn from(err: LifecycleError) -> Self {
        match err {
            LifecycleError::Validation(failure) => {
                let field = match &failure {
                    ValidationFailure::BlankField(field) => Some(field.to_string()),
                    ValidationFailure::AttendanceOutOfRange { .. } => Some("attendance_pct".to_string()),
                    ValidationFailure::EmptyReason => Some("reason".to_string()),
                    ValidationFailure::CountMismatch { .. } => Some("expected_count".to_string()),
                    ValidationFailure::MissingTarget => Some("target".to_string()),
                    ValidationFailure::InvalidRoll => Some("roll".to_string()),
                };
                ApiError::ValidationError {
                    message: failure.to_string(),
                    field,
                    row: None,
                }
            }
            LifecycleError::InvalidState { entity_id, message } => {
                ApiError::InvalidState { entity_id, message }
            }
            LifecycleError::CapacityExceeded {
                class_id,
                projected,
                capacity,
            } => ApiError::CapacityExceeded {
                class_id,
                projected,
                capacity,
            },
            LifecycleError::Conflict { entity_id, message } => ApiError::Conflict { entity_id, message },
            LifecycleError::BatchExecution {
                failed_student_ids,
                reason,
            } => ApiError::BatchExecutionError {
                failed_student_ids,
                reason,
            },
            LifecycleError::NotFound { entity, id } => ApiError::NotFound { entity, id },
            LifecycleError::AlreadyExecuted { batch_id } => ApiError::AlreadyExecuted { batch_id },
            LifecycleError::Config(msg) => ApiError::InternalError(format!("配置读取失败: {}", msg)),
            LifecycleError::Collaborator { service, message } => {
                ApiError::InternalError(format!("外部服务 {} 调用失败: {}", service, message))
            }
            LifecycleError::Repository(repo_err) => repo_err.into(),
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::OptimisticLockFailure {
                entity_id,
                expected,
                actual,
            } => ApiError::Conflict {
                message: format!("已被其他会话修改（期望revision={}，实际revision={}）", expected, actual),
                entity_id,
            },
            RepositoryError::NotFound { entity, id } => ApiError::NotFound { entity, id },
            RepositoryError::FieldValueError { field, message } => ApiError::ValidationError {
                message,
                field: Some(field),
                row: None,
            },
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
            other => ApiError::DatabaseError(other.to_string()),
        }
    }
}

// ==========================================
// 从 ImportError 转换
// ==========================================
impl From<ImportError> for ApiError {
    fn from(err: ImportError) -> Self {
        let row = err.row();
        match err {
            ImportError::DatabaseError(repo_err) => repo_err.into(),
            ImportError::FileNotFound(path) => ApiError::NotFound {
                entity: "File".to_string(),
                id: path,
            },
            ImportError::FieldMissing { ref field, .. }
            | ImportError::TypeConversionError { ref field, .. }
            | ImportError::ValueRangeError { ref field, .. } => ApiError::ValidationError {
                field: Some(field.clone()),
                message: err.to_string(),
                row,
            },
            other => ApiError::ValidationError {
                message: other.to_string(),
                field: None,
                row,
            },
        }
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;
