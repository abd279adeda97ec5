// ==========================================
// 学籍生命周期 - 例外升级管理
// ==========================================
// 红线: 例外升级必须有非空原因，并写入审计
// 红线: 例外升级记录只增不删；撤销只取消勾选并回到 Retained
// 约束: 仅对进行中批次 (Draft/Confirmed) 内的学生生效
// ==========================================

use serde::Serialize;
use tracing::instrument;

use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::override_record::OverrideRecord;
use crate::domain::student::{LifecycleStatus, StudentLifecycleRecord};
use crate::domain::types::Reason;
use crate::engine::batch_guard::{load_open_batch_tx, touch_batch_tx};
use crate::engine::error::{LifecycleError, LifecycleResult, ValidationFailure};
use crate::engine::repositories::LifecycleRepositories;
use crate::repository::{
    ActionLogRepository, OverrideRecordRepository, StudentLifecycleRepository,
};

/// 例外升级结果
#[derive(Debug, Clone, Serialize)]
pub struct OverrideOutcome {
    pub override_record: OverrideRecord,
    pub record: StudentLifecycleRecord,
    pub batch_revision: i64,
}

pub struct OverrideManager {
    repos: LifecycleRepositories,
}

impl OverrideManager {
    pub fn new(repos: LifecycleRepositories) -> Self {
        Self { repos }
    }

    /// 对留级学生授予例外升级
    ///
    /// # 错误
    /// - `Validation(EmptyReason)`: 原因为空（任何状态变更之前）
    /// - `NotFound`: 学生不存在
    /// - `InvalidState`: 学生当前不是 Retained，或不在进行中的批次内
    /// - `Conflict`: 批次 revision 已变化
    #[instrument(skip(self, reason), fields(student_id = %student_id, approver = %approver))]
    pub fn apply_override(
        &self,
        student_id: &str,
        reason: &str,
        approver: &str,
        expected_revision: i64,
    ) -> LifecycleResult<OverrideOutcome> {
        let reason = Reason::new(reason).ok_or(ValidationFailure::EmptyReason)?;
        if approver.trim().is_empty() {
            return Err(ValidationFailure::BlankField("approved_by").into());
        }

        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut record = StudentLifecycleRepository::find_by_id_tx(&tx, student_id)?
            .ok_or_else(|| LifecycleError::not_found("StudentLifecycleRecord", student_id))?;

        if record.status != LifecycleStatus::Retained {
            return Err(LifecycleError::invalid_state(
                student_id,
                format!("仅 RETAINED 学生可例外升级，当前状态 {}", record.status.as_str()),
            ));
        }
        let batch_id = record.batch_id.clone().ok_or_else(|| {
            LifecycleError::invalid_state(student_id, "学生不在进行中的升级批次内")
        })?;
        let mut batch = load_open_batch_tx(&tx, &batch_id, expected_revision)?;

        let override_record =
            OverrideRecord::new(student_id, Some(batch_id.clone()), reason, approver.trim());
        OverrideRecordRepository::insert_tx(&tx, &override_record)?;

        record.set_status(LifecycleStatus::Conditional {
            grant: override_record.grant(),
        });
        record
            .set_selected(true)
            .map_err(|e| LifecycleError::invalid_state(&e.student_id, e.status))?;
        record.updated_at = chrono::Local::now().naive_local();
        StudentLifecycleRepository::save_tx(&tx, &record)?;

        let batch_revision = touch_batch_tx(&tx, &mut batch)?;

        let log = ActionLog::new(ActionType::OverridePromotion, approver.trim(), student_id)
            .with_reason(override_record.reason.as_str())
            .with_batch(&batch_id)
            .with_payload(&serde_json::json!({ "override_id": override_record.override_id }));
        ActionLogRepository::insert_tx(&tx, &log)?;

        tx.commit()?;

        tracing::info!(
            override_id = %override_record.override_id,
            batch_id = %batch_id,
            "例外升级已授予"
        );
        Ok(OverrideOutcome {
            override_record,
            record,
            batch_revision,
        })
    }

    /// 撤销例外升级（仅限批次执行前）
    ///
    /// 例外升级记录保留；学生回到 Retained 并取消勾选
    #[instrument(skip(self), fields(student_id = %student_id, actor = %actor))]
    pub fn revoke_override(
        &self,
        student_id: &str,
        actor: &str,
        expected_revision: i64,
    ) -> LifecycleResult<OverrideOutcome> {
        if actor.trim().is_empty() {
            return Err(ValidationFailure::BlankField("actor").into());
        }

        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut record = StudentLifecycleRepository::find_by_id_tx(&tx, student_id)?
            .ok_or_else(|| LifecycleError::not_found("StudentLifecycleRecord", student_id))?;

        let grant = record.status.override_grant().cloned().ok_or_else(|| {
            LifecycleError::invalid_state(
                student_id,
                format!("学生没有生效中的例外升级，当前状态 {}", record.status.as_str()),
            )
        })?;
        let batch_id = record.batch_id.clone().ok_or_else(|| {
            LifecycleError::invalid_state(student_id, "批次已执行，例外升级不可撤销")
        })?;
        let mut batch = load_open_batch_tx(&tx, &batch_id, expected_revision)?;

        let override_record = OverrideRecordRepository::find_by_id_tx(&tx, &grant.override_id)?
            .ok_or_else(|| LifecycleError::not_found("OverrideRecord", &grant.override_id))?;

        record.set_status(LifecycleStatus::Retained);
        record.updated_at = chrono::Local::now().naive_local();
        StudentLifecycleRepository::save_tx(&tx, &record)?;

        let batch_revision = touch_batch_tx(&tx, &mut batch)?;

        let log = ActionLog::new(ActionType::OverrideRevoked, actor.trim(), student_id)
            .with_batch(&batch_id)
            .with_payload(&serde_json::json!({ "override_id": grant.override_id }));
        ActionLogRepository::insert_tx(&tx, &log)?;

        tx.commit()?;

        tracing::info!(override_id = %grant.override_id, "例外升级已撤销");
        Ok(OverrideOutcome {
            override_record,
            record,
            batch_revision,
        })
    }
}
