// ==========================================
// 选择阶段: 建批 / 目标 / 勾选 / 编班预设 / 重新判定
// ==========================================
// 每次修改都校验 revision，成功后 revision + 1
// Confirmed 批次被修改后退回 Draft
// ==========================================

use std::collections::BTreeMap;
use std::collections::HashMap;

use tracing::instrument;

use super::core::{collaborator_err, require_field, BatchView, PromotionBatchExecutor};
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::batch::{BatchTarget, PromotionBatch};
use crate::domain::student::{LifecycleStatus, Placement, StudentLifecycleRecord};
use crate::domain::types::BatchStatus;
use crate::engine::batch_guard::{load_open_batch_tx, touch_batch_tx};
use crate::engine::eligibility::{Eligibility, EligibilityEvaluator};
use crate::engine::error::{LifecycleError, LifecycleResult, ValidationFailure};
use crate::perf::PerfGuard;
use crate::repository::{
    ActionLogRepository, PromotionBatchRepository, RecordClaimRepository,
    StudentLifecycleRepository,
};

impl PromotionBatchExecutor {
    /// 选定源班级/学年，建立 Draft 批次
    ///
    /// 每名在读学生按资格判定初始化勾选: Eligible → 选中, Retained → 不选
    ///
    /// # 错误
    /// - `NotFound`: 花名册为空
    /// - `Validation`: 出勤率越界
    /// - `Conflict`: 有学生已被其他进行中的批次占用
    #[instrument(skip(self), fields(source_class = %source_class, source_year = %source_year))]
    pub fn select_cohort(
        &self,
        source_class: &str,
        source_year: &str,
        owner: &str,
    ) -> LifecycleResult<BatchView> {
        require_field(source_class, "source_class")?;
        require_field(source_year, "source_year")?;
        require_field(owner, "owner")?;
        let _perf = PerfGuard::new("promotion.select").with_label(&format!("{}/{}", source_class, source_year));

        let evaluator = self.evaluator()?;
        let members = self
            .collaborators
            .roster
            .list_cohort(source_class, source_year)
            .map_err(collaborator_err("roster"))?;
        if members.is_empty() {
            return Err(LifecycleError::not_found(
                "Cohort",
                &format!("{}/{}", source_class, source_year),
            ));
        }
        for m in &members {
            EligibilityEvaluator::validate_attendance(&m.student_id, m.performance.attendance_pct)?;
        }

        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        let ids: Vec<String> = members.iter().map(|m| m.student_id.clone()).collect();
        let claims = RecordClaimRepository::find_claims_tx(&tx, &ids)?;
        if let Some((student_id, batch_id)) = claims.first() {
            return Err(LifecycleError::conflict(
                student_id,
                format!("学生已被批次 {} 占用（共 {} 人冲突）", batch_id, claims.len()),
            ));
        }

        let mut records = Vec::with_capacity(members.len());
        let mut decisions: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for m in members {
            let existing = StudentLifecycleRepository::find_by_id_tx(&tx, &m.student_id)?;
            if existing.as_ref().is_some_and(|r| r.status.is_archived()) {
                tracing::debug!(student_id = %m.student_id, "已归档，跳过");
                continue;
            }

            let (eligibility, reasons) =
                evaluator.evaluate(m.performance.attendance_pct, m.performance.exam_result);
            let mut record = StudentLifecycleRecord::new(
                &m.student_id,
                &m.name,
                Some(m.placement),
                Some(m.academic_year),
                m.performance,
                eligibility.into_status(),
            );
            record.guardian_contact = m.guardian_contact;
            record.restored_from_archive_id =
                existing.and_then(|r| r.restored_from_archive_id);
            if eligibility == Eligibility::Eligible {
                record
                    .set_selected(true)
                    .map_err(|e| LifecycleError::invalid_state(&e.student_id, e.status))?;
            }
            decisions.insert(record.student_id.clone(), reasons);
            records.push(record);
        }

        if records.is_empty() {
            return Err(LifecycleError::invalid_state(
                &format!("{}/{}", source_class, source_year),
                "班级内没有在读学生",
            ));
        }

        let member_ids: Vec<String> = records.iter().map(|r| r.student_id.clone()).collect();
        let batch = PromotionBatch::new_draft(source_class, source_year, owner.trim(), member_ids);
        PromotionBatchRepository::insert_tx(&tx, &batch)?;
        for record in records.iter_mut() {
            record.batch_id = Some(batch.batch_id.clone());
            StudentLifecycleRepository::save_tx(&tx, record)?;
        }
        RecordClaimRepository::insert_claims_tx(&tx, &batch.batch_id, &batch.member_ids)?;

        let selected = records.iter().filter(|r| r.is_selected()).count();
        let log = ActionLog::new(ActionType::BatchCreated, owner.trim(), &batch.batch_id)
            .with_batch(&batch.batch_id)
            .with_payload(&serde_json::json!({
                "source_class": source_class,
                "source_year": source_year,
                "member_count": records.len(),
                "selected_count": selected,
                "threshold_pct": evaluator.threshold_pct(),
                "decisions": decisions,
            }));
        ActionLogRepository::insert_tx(&tx, &log)?;

        tx.commit()?;

        tracing::info!(
            batch_id = %batch.batch_id,
            members = records.len(),
            selected,
            "升级批次已建立"
        );
        Ok(BatchView { batch, records })
    }

    /// 设置目标班级/学年
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub fn set_target(
        &self,
        batch_id: &str,
        expected_revision: i64,
        target_class: &str,
        target_year: &str,
        actor: &str,
    ) -> LifecycleResult<BatchView> {
        require_field(target_class, "target_class")?;
        require_field(target_year, "target_year")?;
        require_field(actor, "actor")?;

        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut batch = load_open_batch_tx(&tx, batch_id, expected_revision)?;
        batch.target = Some(BatchTarget {
            class_id: target_class.trim().to_string(),
            academic_year: target_year.trim().to_string(),
        });
        touch_batch_tx(&tx, &mut batch)?;

        let log = ActionLog::new(ActionType::BatchTargetSet, actor.trim(), batch_id)
            .with_batch(batch_id)
            .with_payload(&batch.target);
        ActionLogRepository::insert_tx(&tx, &log)?;

        let view = Self::view_tx(&tx, batch_id)?;
        tx.commit()?;
        Ok(view)
    }

    /// 切换单个学生的勾选
    ///
    /// # 错误
    /// - `InvalidState`: Retained 学生未经例外升级不可选中
    #[instrument(skip(self), fields(batch_id = %batch_id, student_id = %student_id))]
    pub fn toggle_selection(
        &self,
        batch_id: &str,
        expected_revision: i64,
        student_id: &str,
        actor: &str,
    ) -> LifecycleResult<BatchView> {
        require_field(actor, "actor")?;

        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut batch = load_open_batch_tx(&tx, batch_id, expected_revision)?;
        let mut record = member_record_tx(&tx, &batch, student_id)?;

        let selected = !record.is_selected();
        record.set_selected(selected).map_err(|e| {
            LifecycleError::invalid_state(
                &e.student_id,
                format!("{} 学生需先例外升级才能选中", e.status),
            )
        })?;
        record.updated_at = chrono::Local::now().naive_local();
        StudentLifecycleRepository::save_tx(&tx, &record)?;
        touch_batch_tx(&tx, &mut batch)?;

        let log = ActionLog::new(ActionType::SelectionChanged, actor.trim(), student_id)
            .with_batch(batch_id)
            .with_payload(&serde_json::json!({ "selected": selected }));
        ActionLogRepository::insert_tx(&tx, &log)?;

        let view = Self::view_tx(&tx, batch_id)?;
        tx.commit()?;
        Ok(view)
    }

    /// 批量勾选/取消（Retained 学生不参与）
    #[instrument(skip(self), fields(batch_id = %batch_id, include))]
    pub fn bulk_select(
        &self,
        batch_id: &str,
        expected_revision: i64,
        include: bool,
        actor: &str,
    ) -> LifecycleResult<BatchView> {
        require_field(actor, "actor")?;

        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut batch = load_open_batch_tx(&tx, batch_id, expected_revision)?;
        let records = StudentLifecycleRepository::find_by_batch_tx(&tx, batch_id)?;

        let mut changed = Vec::new();
        for mut record in records {
            if !record.status.is_selectable() || record.is_selected() == include {
                continue;
            }
            record
                .set_selected(include)
                .map_err(|e| LifecycleError::invalid_state(&e.student_id, e.status))?;
            record.updated_at = chrono::Local::now().naive_local();
            StudentLifecycleRepository::save_tx(&tx, &record)?;
            changed.push(record.student_id);
        }
        touch_batch_tx(&tx, &mut batch)?;

        let log = ActionLog::new(ActionType::SelectionChanged, actor.trim(), batch_id)
            .with_batch(batch_id)
            .with_payload(&serde_json::json!({ "include": include, "changed": changed }));
        ActionLogRepository::insert_tx(&tx, &log)?;

        let view = Self::view_tx(&tx, batch_id)?;
        tx.commit()?;

        tracing::info!(changed = changed.len(), "批量勾选完成");
        Ok(view)
    }

    /// 预设目标分班与学号（不预设时执行阶段自动编排）
    #[instrument(skip(self), fields(batch_id = %batch_id, student_id = %student_id))]
    pub fn set_proposed_placement(
        &self,
        batch_id: &str,
        expected_revision: i64,
        student_id: &str,
        section: &str,
        roll: u32,
        actor: &str,
    ) -> LifecycleResult<BatchView> {
        require_field(section, "section")?;
        require_field(actor, "actor")?;
        if roll == 0 {
            return Err(ValidationFailure::InvalidRoll.into());
        }

        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut batch = load_open_batch_tx(&tx, batch_id, expected_revision)?;
        let target = batch.target.clone().ok_or(ValidationFailure::MissingTarget)?;
        let mut record = member_record_tx(&tx, &batch, student_id)?;

        let proposed = Placement::new(&target.class_id, section.trim(), roll);
        record.proposed = Some(proposed.clone());
        record.updated_at = chrono::Local::now().naive_local();
        StudentLifecycleRepository::save_tx(&tx, &record)?;
        touch_batch_tx(&tx, &mut batch)?;

        let log = ActionLog::new(ActionType::PlacementProposed, actor.trim(), student_id)
            .with_batch(batch_id)
            .with_payload(&proposed);
        ActionLogRepository::insert_tx(&tx, &log)?;

        let view = Self::view_tx(&tx, batch_id)?;
        tx.commit()?;
        Ok(view)
    }

    /// 重新读取花名册并重新判定（仅 Draft）
    ///
    /// Conditional 不会被降级；Retained → Eligible 的学生自动选中
    #[instrument(skip(self), fields(batch_id = %batch_id))]
    pub fn refresh_cohort(
        &self,
        batch_id: &str,
        expected_revision: i64,
        actor: &str,
    ) -> LifecycleResult<BatchView> {
        require_field(actor, "actor")?;

        let current = self
            .repos
            .batch_repo
            .find_by_id(batch_id)?
            .ok_or_else(|| LifecycleError::not_found("PromotionBatch", batch_id))?;
        ensure_draft(&current)?;

        let evaluator = self.evaluator()?;
        let members = self
            .collaborators
            .roster
            .list_cohort(&current.source_class, &current.source_year)
            .map_err(collaborator_err("roster"))?;
        for m in &members {
            EligibilityEvaluator::validate_attendance(&m.student_id, m.performance.attendance_pct)?;
        }
        let mut by_id: HashMap<String, _> =
            members.into_iter().map(|m| (m.student_id.clone(), m)).collect();

        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut batch = load_open_batch_tx(&tx, batch_id, expected_revision)?;
        ensure_draft(&batch)?;

        let mut changed: BTreeMap<String, String> = BTreeMap::new();
        for mut record in StudentLifecycleRepository::find_by_batch_tx(&tx, batch_id)? {
            let Some(member) = by_id.remove(&record.student_id) else {
                tracing::warn!(student_id = %record.student_id, "花名册中已不存在，保持原状");
                continue;
            };
            record.name = member.name;
            record.placement = Some(member.placement);
            record.performance = member.performance;
            record.guardian_contact = member.guardian_contact;

            if record.status.override_grant().is_none() {
                let before = record.status.clone();
                let after = evaluator.classify(&record.performance).into_status();
                if before != after {
                    record.set_status(after.clone());
                    if before == LifecycleStatus::Retained {
                        record
                            .set_selected(true)
                            .map_err(|e| LifecycleError::invalid_state(&e.student_id, e.status))?;
                    }
                    changed.insert(record.student_id.clone(), after.as_str().to_string());
                }
            }
            record.updated_at = chrono::Local::now().naive_local();
            StudentLifecycleRepository::save_tx(&tx, &record)?;
        }
        touch_batch_tx(&tx, &mut batch)?;

        let log = ActionLog::new(ActionType::CohortRefreshed, actor.trim(), batch_id)
            .with_batch(batch_id)
            .with_payload(&serde_json::json!({ "changed": changed }));
        ActionLogRepository::insert_tx(&tx, &log)?;

        let view = Self::view_tx(&tx, batch_id)?;
        tx.commit()?;

        tracing::info!(changed = changed.len(), "重新判定完成");
        Ok(view)
    }
}

/// 读取批次成员记录
fn member_record_tx(
    conn: &rusqlite::Connection,
    batch: &PromotionBatch,
    student_id: &str,
) -> LifecycleResult<StudentLifecycleRecord> {
    if !batch.is_member(student_id) {
        return Err(LifecycleError::not_found(
            "BatchMember",
            &format!("{}/{}", batch.batch_id, student_id),
        ));
    }
    StudentLifecycleRepository::find_by_id_tx(conn, student_id)?
        .ok_or_else(|| LifecycleError::not_found("StudentLifecycleRecord", student_id))
}

fn ensure_draft(batch: &PromotionBatch) -> LifecycleResult<()> {
    if batch.status != BatchStatus::Draft {
        return Err(LifecycleError::invalid_state(
            &batch.batch_id,
            format!("仅 DRAFT 批次可重新判定，当前 {}", batch.status),
        ));
    }
    Ok(())
}
