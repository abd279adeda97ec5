// ==========================================
// 学籍生命周期 - 操作员命令
// ==========================================
// 格式: {"command": "ExecuteBatch", "batch_id": "...", "expected_revision": 3}
// actor 省略时使用配置的默认操作员
// ==========================================

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::api::error::{ApiError, ApiResult};
use crate::api::lifecycle_api::LifecycleApi;
use crate::domain::types::ExitStatus;

/// 操作员命令（serde 按 `command` 字段区分）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command")]
pub enum OperatorCommand {
    // ===== 升级批次 =====
    SelectSourceCohort {
        source_class: String,
        source_year: String,
        #[serde(default)]
        actor: Option<String>,
    },
    SetTarget {
        batch_id: String,
        expected_revision: i64,
        target_class: String,
        target_year: String,
        #[serde(default)]
        actor: Option<String>,
    },
    ToggleSelection {
        batch_id: String,
        expected_revision: i64,
        student_id: String,
        #[serde(default)]
        actor: Option<String>,
    },
    BulkSelect {
        batch_id: String,
        expected_revision: i64,
        include: bool,
        #[serde(default)]
        actor: Option<String>,
    },
    SetProposedPlacement {
        batch_id: String,
        expected_revision: i64,
        student_id: String,
        section: String,
        roll: u32,
        #[serde(default)]
        actor: Option<String>,
    },
    RefreshCohort {
        batch_id: String,
        expected_revision: i64,
        #[serde(default)]
        actor: Option<String>,
    },
    ConfirmBatch {
        batch_id: String,
        expected_revision: i64,
        #[serde(default)]
        target_class: Option<String>,
        #[serde(default)]
        target_year: Option<String>,
        #[serde(default)]
        actor: Option<String>,
    },
    ExecuteBatch {
        batch_id: String,
        expected_revision: i64,
        #[serde(default)]
        actor: Option<String>,
    },
    RejectBatch {
        batch_id: String,
        expected_revision: i64,
        reason: String,
        #[serde(default)]
        actor: Option<String>,
    },
    ReopenBatch {
        batch_id: String,
        expected_revision: i64,
        #[serde(default)]
        actor: Option<String>,
    },

    // ===== 例外升级 =====
    ApplyOverride {
        student_id: String,
        reason: String,
        expected_revision: i64,
        #[serde(default)]
        approved_by: Option<String>,
    },
    RevokeOverride {
        student_id: String,
        expected_revision: i64,
        #[serde(default)]
        actor: Option<String>,
    },

    // ===== 归档 =====
    BulkArchive {
        source_class: String,
        source_year: String,
        exit_status: ExitStatus,
        expected_count: usize,
        #[serde(default)]
        actor: Option<String>,
    },
    ArchiveStudent {
        student_id: String,
        exit_status: ExitStatus,
        #[serde(default)]
        actor: Option<String>,
    },
    Reactivate {
        student_id: String,
        reason: String,
        #[serde(default)]
        restored_by: Option<String>,
    },
    ArchivedCohort {
        class_id: String,
        academic_year: String,
    },

    // ===== 查询 =====
    GetBatch {
        batch_id: String,
    },
    ListBatches {
        source_class: String,
        source_year: String,
    },
    GetStudent {
        student_id: String,
    },
    AuditTrail {
        entity_id: String,
    },
    AuditByActor {
        actor: String,
        #[serde(default)]
        limit: Option<i32>,
    },
    AuditByAction {
        action_type: String,
        #[serde(default)]
        limit: Option<i32>,
    },
    RecentAudit {
        #[serde(default)]
        limit: Option<i32>,
    },

    // ===== 运维 =====
    DispatchNotifications {
        #[serde(default)]
        limit: Option<usize>,
    },
    ImportRoster {
        path: String,
    },
    SetConfig {
        key: String,
        value: String,
    },
    GetConfig,
}

impl OperatorCommand {
    /// 命令名（日志用）
    pub fn name(&self) -> &'static str {
        match self {
            OperatorCommand::SelectSourceCohort { .. } => "SelectSourceCohort",
            OperatorCommand::SetTarget { .. } => "SetTarget",
            OperatorCommand::ToggleSelection { .. } => "ToggleSelection",
            OperatorCommand::BulkSelect { .. } => "BulkSelect",
            OperatorCommand::SetProposedPlacement { .. } => "SetProposedPlacement",
            OperatorCommand::RefreshCohort { .. } => "RefreshCohort",
            OperatorCommand::ConfirmBatch { .. } => "ConfirmBatch",
            OperatorCommand::ExecuteBatch { .. } => "ExecuteBatch",
            OperatorCommand::RejectBatch { .. } => "RejectBatch",
            OperatorCommand::ReopenBatch { .. } => "ReopenBatch",
            OperatorCommand::ApplyOverride { .. } => "ApplyOverride",
            OperatorCommand::RevokeOverride { .. } => "RevokeOverride",
            OperatorCommand::BulkArchive { .. } => "BulkArchive",
            OperatorCommand::ArchiveStudent { .. } => "ArchiveStudent",
            OperatorCommand::Reactivate { .. } => "Reactivate",
            OperatorCommand::ArchivedCohort { .. } => "ArchivedCohort",
            OperatorCommand::GetBatch { .. } => "GetBatch",
            OperatorCommand::ListBatches { .. } => "ListBatches",
            OperatorCommand::GetStudent { .. } => "GetStudent",
            OperatorCommand::AuditTrail { .. } => "AuditTrail",
            OperatorCommand::AuditByActor { .. } => "AuditByActor",
            OperatorCommand::AuditByAction { .. } => "AuditByAction",
            OperatorCommand::RecentAudit { .. } => "RecentAudit",
            OperatorCommand::DispatchNotifications { .. } => "DispatchNotifications",
            OperatorCommand::ImportRoster { .. } => "ImportRoster",
            OperatorCommand::SetConfig { .. } => "SetConfig",
            OperatorCommand::GetConfig => "GetConfig",
        }
    }
}

impl LifecycleApi {
    /// 执行一条操作员命令，返回 JSON 结果
    pub fn handle(&self, command: OperatorCommand) -> ApiResult<JsonValue> {
        tracing::debug!(command = command.name(), "处理操作员命令");

        match command {
            OperatorCommand::SelectSourceCohort {
                source_class,
                source_year,
                actor,
            } => to_json(self.select_cohort(&source_class, &source_year, actor.as_deref())?),
            OperatorCommand::SetTarget {
                batch_id,
                expected_revision,
                target_class,
                target_year,
                actor,
            } => to_json(self.set_target(
                &batch_id,
                expected_revision,
                &target_class,
                &target_year,
                actor.as_deref(),
            )?),
            OperatorCommand::ToggleSelection {
                batch_id,
                expected_revision,
                student_id,
                actor,
            } => to_json(self.toggle_selection(
                &batch_id,
                expected_revision,
                &student_id,
                actor.as_deref(),
            )?),
            OperatorCommand::BulkSelect {
                batch_id,
                expected_revision,
                include,
                actor,
            } => to_json(self.bulk_select(&batch_id, expected_revision, include, actor.as_deref())?),
            OperatorCommand::SetProposedPlacement {
                batch_id,
                expected_revision,
                student_id,
                section,
                roll,
                actor,
            } => to_json(self.set_proposed_placement(
                &batch_id,
                expected_revision,
                &student_id,
                &section,
                roll,
                actor.as_deref(),
            )?),
            OperatorCommand::RefreshCohort {
                batch_id,
                expected_revision,
                actor,
            } => to_json(self.refresh_cohort(&batch_id, expected_revision, actor.as_deref())?),
            OperatorCommand::ConfirmBatch {
                batch_id,
                expected_revision,
                target_class,
                target_year,
                actor,
            } => {
                let target = match (target_class.as_deref(), target_year.as_deref()) {
                    (Some(class_id), Some(year)) => Some((class_id, year)),
                    (None, None) => None,
                    _ => {
                        return Err(ApiError::ValidationError {
                            message: "target_class 与 target_year 必须同时提供".to_string(),
                            field: Some("target".to_string()),
                            row: None,
                        })
                    }
                };
                to_json(self.confirm_batch(&batch_id, expected_revision, target, actor.as_deref())?)
            }
            OperatorCommand::ExecuteBatch {
                batch_id,
                expected_revision,
                actor,
            } => to_json(self.execute_batch(&batch_id, expected_revision, actor.as_deref())?),
            OperatorCommand::RejectBatch {
                batch_id,
                expected_revision,
                reason,
                actor,
            } => to_json(self.reject_batch(&batch_id, expected_revision, &reason, actor.as_deref())?),
            OperatorCommand::ReopenBatch {
                batch_id,
                expected_revision,
                actor,
            } => to_json(self.reopen_batch(&batch_id, expected_revision, actor.as_deref())?),
            OperatorCommand::ApplyOverride {
                student_id,
                reason,
                expected_revision,
                approved_by,
            } => to_json(self.apply_override(
                &student_id,
                &reason,
                approved_by.as_deref(),
                expected_revision,
            )?),
            OperatorCommand::RevokeOverride {
                student_id,
                expected_revision,
                actor,
            } => to_json(self.revoke_override(&student_id, expected_revision, actor.as_deref())?),
            OperatorCommand::BulkArchive {
                source_class,
                source_year,
                exit_status,
                expected_count,
                actor,
            } => to_json(self.bulk_archive(
                &source_class,
                &source_year,
                exit_status,
                expected_count,
                actor.as_deref(),
            )?),
            OperatorCommand::ArchiveStudent {
                student_id,
                exit_status,
                actor,
            } => to_json(self.archive_student(&student_id, exit_status, actor.as_deref())?),
            OperatorCommand::Reactivate {
                student_id,
                reason,
                restored_by,
            } => to_json(self.reactivate(&student_id, &reason, restored_by.as_deref())?),
            OperatorCommand::ArchivedCohort {
                class_id,
                academic_year,
            } => to_json(self.archived_cohort(&class_id, &academic_year)?),
            OperatorCommand::GetBatch { batch_id } => to_json(self.get_batch(&batch_id)?),
            OperatorCommand::ListBatches {
                source_class,
                source_year,
            } => to_json(self.list_batches(&source_class, &source_year)?),
            OperatorCommand::GetStudent { student_id } => to_json(self.get_student(&student_id)?),
            OperatorCommand::AuditTrail { entity_id } => to_json(self.audit_trail(&entity_id)?),
            OperatorCommand::AuditByActor { actor, limit } => to_json(self.audit_by_actor(&actor, limit)?),
            OperatorCommand::AuditByAction { action_type, limit } => {
                to_json(self.audit_by_action(&action_type, limit)?)
            }
            OperatorCommand::RecentAudit { limit } => to_json(self.recent_audit(limit)?),
            OperatorCommand::DispatchNotifications { limit } => {
                to_json(self.dispatch_notifications(limit)?)
            }
            OperatorCommand::ImportRoster { path } => to_json(self.import_roster(&path)?),
            OperatorCommand::SetConfig { key, value } => self.set_config(&key, &value),
            OperatorCommand::GetConfig => self.get_config(),
        }
    }
}

fn to_json<T: Serialize>(value: T) -> ApiResult<JsonValue> {
    serde_json::to_value(value).map_err(|e| ApiError::InternalError(format!("序列化失败: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tagged_command() {
        let cmd: OperatorCommand = serde_json::from_str(
            r#"{"command":"ExecuteBatch","batch_id":"B1","expected_revision":4}"#,
        )
        .unwrap();
        assert_eq!(
            cmd,
            OperatorCommand::ExecuteBatch {
                batch_id: "B1".to_string(),
                expected_revision: 4,
                actor: None,
            }
        );
        assert_eq!(cmd.name(), "ExecuteBatch");
    }

    #[test]
    fn test_parse_exit_status_and_unit_command() {
        let cmd: OperatorCommand = serde_json::from_str(
            r#"{"command":"ArchiveStudent","student_id":"S1","exit_status":"GRADUATED","actor":"registrar"}"#,
        )
        .unwrap();
        match cmd {
            OperatorCommand::ArchiveStudent { exit_status, actor, .. } => {
                assert_eq!(exit_status, ExitStatus::Graduated);
                assert_eq!(actor.as_deref(), Some("registrar"));
            }
            other => panic!("unexpected: {:?}", other),
        }

        let cmd: OperatorCommand = serde_json::from_str(r#"{"command":"GetConfig"}"#).unwrap();
        assert_eq!(cmd, OperatorCommand::GetConfig);
        assert!(serde_json::from_str::<OperatorCommand>(r#"{"command":"DropTables"}"#).is_err());
    }
}
