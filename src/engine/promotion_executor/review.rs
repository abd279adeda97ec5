// ==========================================
// 驳回与重开
// ==========================================
// Draft/Confirmed → Rejected: 释放占用，学生记录保留在批次上
// Rejected → Draft: 重新占用；期间被他人占用或已归档则冲突
// ==========================================

use tracing::instrument;

use super::core::{require_field, BatchView, PromotionBatchExecutor};
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::types::{BatchStatus, Reason};
use crate::engine::batch_guard::{check_revision, load_open_batch_tx, save_batch_tx};
use crate::engine::error::{LifecycleError, LifecycleResult, ValidationFailure};
use crate::repository::{
    ActionLogRepository, PromotionBatchRepository, RecordClaimRepository,
    StudentLifecycleRepository,
};

impl PromotionBatchExecutor {
    /// 驳回批次
    #[instrument(skip(self, reason), fields(batch_id = %batch_id, actor = %actor))]
    pub fn reject_batch(
        &self,
        batch_id: &str,
        expected_revision: i64,
        reason: &str,
        actor: &str,
    ) -> LifecycleResult<BatchView> {
        let reason = Reason::new(reason).ok_or(ValidationFailure::EmptyReason)?;
        require_field(actor, "actor")?;

        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut batch = load_open_batch_tx(&tx, batch_id, expected_revision)?;
        batch.status = BatchStatus::Rejected;
        batch.confirmed_projection = None;
        batch.rejected_reason = Some(reason.as_str().to_string());
        save_batch_tx(&tx, &mut batch)?;
        let released = RecordClaimRepository::release_by_batch_tx(&tx, batch_id)?;

        let log = ActionLog::new(ActionType::BatchRejected, actor.trim(), batch_id)
            .with_batch(batch_id)
            .with_reason(reason.as_str())
            .with_payload(&serde_json::json!({ "released_claims": released }));
        ActionLogRepository::insert_tx(&tx, &log)?;

        let view = Self::view_tx(&tx, batch_id)?;
        tx.commit()?;

        tracing::info!(released, "批次已驳回");
        Ok(view)
    }

    /// 重开已驳回的批次
    ///
    /// # 错误
    /// - `InvalidState`: 批次不是 Rejected
    /// - `Conflict`: 成员已被其他批次占用、已转入其他批次或已归档
    #[instrument(skip(self), fields(batch_id = %batch_id, actor = %actor))]
    pub fn reopen_batch(
        &self,
        batch_id: &str,
        expected_revision: i64,
        actor: &str,
    ) -> LifecycleResult<BatchView> {
        require_field(actor, "actor")?;

        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut batch = PromotionBatchRepository::find_by_id_tx(&tx, batch_id)?
            .ok_or_else(|| LifecycleError::not_found("PromotionBatch", batch_id))?;
        if batch.status != BatchStatus::Rejected {
            return Err(LifecycleError::invalid_state(
                batch_id,
                format!("仅 REJECTED 批次可重开，当前 {}", batch.status),
            ));
        }
        check_revision(&batch, expected_revision)?;

        let claims = RecordClaimRepository::find_claims_tx(&tx, &batch.member_ids)?;
        if let Some((student_id, other)) = claims.first() {
            return Err(LifecycleError::conflict(
                student_id,
                format!("学生已被批次 {} 占用", other),
            ));
        }
        for record in StudentLifecycleRepository::find_by_batch_tx(&tx, batch_id)? {
            if record.status.is_archived() || record.batch_id.as_deref() != Some(batch_id) {
                return Err(LifecycleError::conflict(
                    &record.student_id,
                    "学生记录在驳回后已发生变化，请重新建批",
                ));
            }
        }

        RecordClaimRepository::insert_claims_tx(&tx, batch_id, &batch.member_ids)?;
        batch.status = BatchStatus::Draft;
        batch.rejected_reason = None;
        save_batch_tx(&tx, &mut batch)?;

        let log = ActionLog::new(ActionType::BatchReopened, actor.trim(), batch_id).with_batch(batch_id);
        ActionLogRepository::insert_tx(&tx, &log)?;

        let view = Self::view_tx(&tx, batch_id)?;
        tx.commit()?;

        tracing::info!(revision = view.batch.revision, "批次已重开");
        Ok(view)
    }
}
