// ==========================================
// 确认与执行
// ==========================================
// confirm: 提示性容量检查 → Confirmed
// execute:
//   同一批次同时只有一个执行者（执行槽），槽内读取批次
//   阶段0 状态/令牌校验（AlreadyExecuted 优先）
//   占用目标席位槽，同一目标班级/学年的阶段1至阶段3 串行
//   阶段1 以最新容量快照权威复核，不通过则退回 Draft，不改任何学生
//   阶段2 外部副作用（编班、收费），逐项登记补偿
//   阶段3 单事务提交: 快照 / 记录 / 通知出箱 / 审计 / 批次 Executed
// 任一阶段失败: 逆序补偿外部副作用，批次保持 Confirmed
// ==========================================

use std::collections::HashMap;

use rusqlite::Connection;
use tracing::instrument;

use super::core::{collaborator_err, require_field, ExecutionReport, PromotionBatchExecutor};
use crate::config::RollNumbering;
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::batch::{BatchTarget, PromotionBatch};
use crate::domain::capacity::ClassCapacity;
use crate::domain::notification::{NotificationKind, OutboxMessage};
use crate::domain::snapshot::AcademicSnapshot;
use crate::domain::student::{LifecycleStatus, Placement, StudentLifecycleRecord};
use crate::domain::types::BatchStatus;
use crate::engine::batch_guard::{check_revision, load_open_batch_tx, save_batch_tx};
use crate::engine::capacity_guard::CapacityGuard;
use crate::engine::error::{LifecycleError, LifecycleResult, ValidationFailure};
use crate::perf::PerfGuard;
use crate::repository::{
    AcademicSnapshotRepository, ActionLogRepository, NotificationOutboxRepository,
    PromotionBatchRepository, RecordClaimRepository, StudentLifecycleRepository,
};

/// 无原分班时使用的默认分班
const DEFAULT_SECTION: &str = "A";

/// 单个学生的升级计划
#[derive(Debug, Clone)]
struct PlannedPromotion {
    student_id: String,
    from: Option<Placement>,
    from_year: Option<String>,
    to: Placement,
}

/// 已发生的外部副作用（用于补偿）
#[derive(Debug)]
enum Compensation {
    Placement {
        student_id: String,
        placement: Placement,
        academic_year: String,
    },
    Fee {
        student_id: String,
        assignment_id: String,
    },
}

impl PromotionBatchExecutor {
    /// 确认批次（Draft → Confirmed）
    ///
    /// # 错误
    /// - `Validation(MissingTarget)`: 未设置目标
    /// - `InvalidState`: 非 Draft，或没有选中学生
    /// - `CapacityExceeded`: 提示性容量检查不通过，批次保持 Draft
    /// - `Conflict`: revision 已变化
    #[instrument(skip(self), fields(batch_id = %batch_id, actor = %actor))]
    pub fn confirm(&self, batch_id: &str, expected_revision: i64, actor: &str) -> LifecycleResult<PromotionBatch> {
        require_field(actor, "actor")?;

        let view = self.load_batch(batch_id)?;
        check_revision(&view.batch, expected_revision)?;
        if view.batch.status != BatchStatus::Draft {
            return Err(LifecycleError::invalid_state(
                batch_id,
                format!("仅 DRAFT 批次可确认，当前 {}", view.batch.status),
            ));
        }
        let target = view.batch.target.clone().ok_or(ValidationFailure::MissingTarget)?;
        let selected_count = view.selected_ids().len() as u32;
        if selected_count == 0 {
            return Err(LifecycleError::invalid_state(batch_id, "没有选中的学生"));
        }

        let capacity = self
            .collaborators
            .capacity
            .get_capacity(&target.class_id, &target.academic_year)
            .map_err(collaborator_err("capacity"))?;
        let projected = CapacityGuard::enforce(&capacity, selected_count)?;

        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut batch = load_open_batch_tx(&tx, batch_id, expected_revision)?;
        batch.status = BatchStatus::Confirmed;
        batch.confirmed_projection = Some(projected);
        save_batch_tx(&tx, &mut batch)?;

        let log = ActionLog::new(ActionType::BatchConfirmed, actor.trim(), batch_id)
            .with_batch(batch_id)
            .with_payload(&serde_json::json!({
                "target": target,
                "selected_count": selected_count,
                "current_enrolled": capacity.current_enrolled,
                "seat_limit": capacity.seat_limit,
                "projected": projected,
            }));
        ActionLogRepository::insert_tx(&tx, &log)?;
        tx.commit()?;

        tracing::info!(projected, revision = batch.revision, "批次已确认");
        Ok(batch)
    }

    /// 执行批次
    ///
    /// # 错误
    /// - `AlreadyExecuted`: 批次已执行（无任何副作用）
    /// - `Conflict`: revision 已变化，或批次正在被其他会话执行
    /// - `InvalidState`: 非 Confirmed
    /// - `CapacityExceeded`: 权威复核不通过，批次退回 Draft，学生记录未改动
    /// - `BatchExecution`: 副作用失败，已全部回滚，批次保持 Confirmed
    #[instrument(skip(self), fields(batch_id = %batch_id, actor = %actor))]
    pub fn execute(&self, batch_id: &str, expected_revision: i64, actor: &str) -> LifecycleResult<ExecutionReport> {
        require_field(actor, "actor")?;
        let _perf = PerfGuard::new("promotion.execute").with_label(batch_id);
        let _slot = self.claim_execution(batch_id)?;

        // ===== 阶段0: 状态校验 =====
        let view = self.load_batch(batch_id)?;
        if view.batch.status == BatchStatus::Executed {
            return Err(LifecycleError::AlreadyExecuted {
                batch_id: batch_id.to_string(),
            });
        }
        check_revision(&view.batch, expected_revision)?;
        if view.batch.status != BatchStatus::Confirmed {
            return Err(LifecycleError::invalid_state(
                batch_id,
                format!("仅 CONFIRMED 批次可执行，当前 {}", view.batch.status),
            ));
        }
        let target = view.batch.target.clone().ok_or(ValidationFailure::MissingTarget)?;
        let selected: Vec<&StudentLifecycleRecord> =
            view.records.iter().filter(|r| r.is_selected()).collect();
        let _target_slot = self.claim_target(&target)?;

        // ===== 阶段1: 权威容量复核（最新快照）=====
        let capacity = self
            .collaborators
            .capacity
            .get_capacity(&target.class_id, &target.academic_year)
            .map_err(collaborator_err("capacity"))?;
        let projected = match CapacityGuard::enforce(&capacity, selected.len() as u32) {
            Ok(projected) => projected,
            Err(err) => {
                self.abort_to_draft(batch_id, expected_revision, actor, &err)?;
                return Err(err);
            }
        };

        // ===== 阶段2: 外部副作用 =====
        let roll_numbering = self
            .config
            .get_roll_numbering()
            .map_err(|e| LifecycleError::Config(e.to_string()))?;
        let plan = plan_placements(&selected, &target, &capacity, roll_numbering);

        let mut compensations = Vec::new();
        let mut fee_assignments: HashMap<String, String> = HashMap::new();
        let mut failed = Vec::new();
        let mut reasons = Vec::new();
        for p in &plan {
            if let Err(e) = self
                .collaborators
                .roster
                .apply_placement(&p.student_id, &p.to, &target.academic_year)
            {
                failed.push(p.student_id.clone());
                reasons.push(format!("{}: 编班失败: {}", p.student_id, e));
                continue;
            }
            if let (Some(from), Some(from_year)) = (&p.from, &p.from_year) {
                compensations.push(Compensation::Placement {
                    student_id: p.student_id.clone(),
                    placement: from.clone(),
                    academic_year: from_year.clone(),
                });
            }

            match self
                .collaborators
                .fees
                .assign_fee_structure(&p.student_id, &target.academic_year)
            {
                Ok(assignment_id) => {
                    fee_assignments.insert(p.student_id.clone(), assignment_id.clone());
                    compensations.push(Compensation::Fee {
                        student_id: p.student_id.clone(),
                        assignment_id,
                    });
                }
                Err(e) => {
                    failed.push(p.student_id.clone());
                    reasons.push(format!("{}: 收费分配失败: {}", p.student_id, e));
                }
            }
        }

        if !failed.is_empty() {
            self.compensate(compensations);
            tracing::warn!(failed = ?failed, "批次执行失败，已回滚外部副作用");
            return Err(LifecycleError::BatchExecution {
                failed_student_ids: failed,
                reason: reasons.join("; "),
            });
        }

        // ===== 阶段3: 单事务提交 =====
        let outcome = self.commit_promotion(
            batch_id,
            expected_revision,
            actor.trim(),
            &target,
            &plan,
            &fee_assignments,
            projected,
        );

        match outcome {
            Ok(report) => {
                tracing::info!(
                    promoted = report.promoted.len(),
                    not_promoted = report.not_promoted.len(),
                    projected,
                    "批次执行完成"
                );
                Ok(report)
            }
            Err(err) => {
                self.compensate(compensations);
                match err {
                    LifecycleError::Conflict { .. } | LifecycleError::AlreadyExecuted { .. } => Err(err),
                    other => Err(LifecycleError::BatchExecution {
                        failed_student_ids: plan.iter().map(|p| p.student_id.clone()).collect(),
                        reason: format!("提交失败: {}", other),
                    }),
                }
            }
        }
    }

    /// 权威复核失败: 批次退回 Draft 并记录审计
    fn abort_to_draft(
        &self,
        batch_id: &str,
        expected_revision: i64,
        actor: &str,
        cause: &LifecycleError,
    ) -> LifecycleResult<()> {
        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut batch = load_open_batch_tx(&tx, batch_id, expected_revision)?;
        batch.status = BatchStatus::Draft;
        batch.confirmed_projection = None;
        save_batch_tx(&tx, &mut batch)?;

        let log = ActionLog::new(ActionType::PromotionAborted, actor.trim(), batch_id)
            .with_batch(batch_id)
            .with_detail(cause.to_string());
        ActionLogRepository::insert_tx(&tx, &log)?;
        tx.commit()?;

        tracing::warn!(revision = batch.revision, error = %cause, "容量复核不通过，批次退回 DRAFT");
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn commit_promotion(
        &self,
        batch_id: &str,
        expected_revision: i64,
        actor: &str,
        target: &BatchTarget,
        plan: &[PlannedPromotion],
        fee_assignments: &HashMap<String, String>,
        projected: u32,
    ) -> LifecycleResult<ExecutionReport> {
        let config_snapshot = self
            .config
            .get_config_snapshot()
            .map_err(|e| LifecycleError::Config(e.to_string()))?;
        let config_json = parse_config_snapshot(&config_snapshot)?;

        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        let mut batch = PromotionBatchRepository::find_by_id_tx(&tx, batch_id)?
            .ok_or_else(|| LifecycleError::not_found("PromotionBatch", batch_id))?;
        if batch.status == BatchStatus::Executed {
            return Err(LifecycleError::AlreadyExecuted {
                batch_id: batch_id.to_string(),
            });
        }
        check_revision(&batch, expected_revision)?;
        if batch.status != BatchStatus::Confirmed {
            return Err(LifecycleError::invalid_state(batch_id, "批次状态已变化"));
        }

        let planned: HashMap<&str, &PlannedPromotion> =
            plan.iter().map(|p| (p.student_id.as_str(), p)).collect();
        let mut promoted = Vec::new();
        let mut not_promoted = Vec::new();

        for mut record in StudentLifecycleRepository::find_by_batch_tx(&tx, batch_id)? {
            match planned.get(record.student_id.as_str()) {
                Some(p) if record.is_selected() => {
                    promote_record_tx(&tx, &mut record, p, target, batch_id, actor, fee_assignments)?;
                    promoted.push(record.student_id);
                }
                _ => {
                    if record.is_selected() {
                        return Err(LifecycleError::conflict(
                            &record.student_id,
                            "选中集合与执行计划不一致",
                        ));
                    }
                    record.batch_id = None;
                    record.updated_at = chrono::Local::now().naive_local();
                    StudentLifecycleRepository::save_tx(&tx, &record)?;
                    not_promoted.push(record.student_id);
                }
            }
        }
        if promoted.len() != plan.len() {
            return Err(LifecycleError::conflict(batch_id, "选中集合与执行计划不一致"));
        }

        let now = chrono::Local::now().naive_local();
        batch.status = BatchStatus::Executed;
        batch.executed_at = Some(now);
        batch.confirmed_projection = Some(projected);
        save_batch_tx(&tx, &mut batch)?;
        RecordClaimRepository::release_by_batch_tx(&tx, batch_id)?;

        let log = ActionLog::new(ActionType::BatchExecuted, actor, batch_id)
            .with_batch(batch_id)
            .with_payload(&serde_json::json!({
                "target": target,
                "promoted": promoted,
                "not_promoted": not_promoted,
                "projected": projected,
                "config": config_json,
            }));
        ActionLogRepository::insert_tx(&tx, &log)?;

        tx.commit()?;

        Ok(ExecutionReport {
            batch,
            promoted,
            not_promoted,
            projected_enrollment: projected,
        })
    }

    /// 逆序补偿外部副作用（尽力而为，失败只记录）
    fn compensate(&self, compensations: Vec<Compensation>) {
        for c in compensations.into_iter().rev() {
            let result = match &c {
                Compensation::Placement {
                    student_id,
                    placement,
                    academic_year,
                } => self
                    .collaborators
                    .roster
                    .apply_placement(student_id, placement, academic_year),
                Compensation::Fee {
                    student_id,
                    assignment_id,
                } => {
                    tracing::debug!(student_id = %student_id, assignment_id = %assignment_id, "撤销收费分配");
                    self.collaborators.fees.revoke_fee_structure(assignment_id)
                }
            };
            if let Err(e) = result {
                tracing::error!(compensation = ?c, error = %e, "补偿失败，需人工核对");
            }
        }
    }
}

/// 配置快照写入执行审计；无法解析时拒绝提交
fn parse_config_snapshot(raw: &str) -> LifecycleResult<serde_json::Value> {
    serde_json::from_str(raw).map_err(|e| LifecycleError::Config(format!("配置快照不是合法 JSON: {}", e)))
}

/// 编排目标分班与学号
///
/// 有预设按预设；否则沿用原分班（缺省 A），学号按配置 APPEND/PRESERVE
fn plan_placements(
    selected: &[&StudentLifecycleRecord],
    target: &BatchTarget,
    capacity: &ClassCapacity,
    roll_numbering: RollNumbering,
) -> Vec<PlannedPromotion> {
    let mut next_roll = capacity.current_enrolled;
    selected
        .iter()
        .map(|r| {
            let to = match &r.proposed {
                Some(p) => Placement::new(&target.class_id, &p.section, p.roll),
                None => {
                    let section = r
                        .placement
                        .as_ref()
                        .map(|p| p.section.as_str())
                        .unwrap_or(DEFAULT_SECTION);
                    let roll = match (roll_numbering, &r.placement) {
                        (RollNumbering::Preserve, Some(p)) => p.roll,
                        _ => {
                            next_roll += 1;
                            next_roll
                        }
                    };
                    Placement::new(&target.class_id, section, roll)
                }
            };
            PlannedPromotion {
                student_id: r.student_id.clone(),
                from: r.placement.clone(),
                from_year: r.academic_year.clone(),
                to,
            }
        })
        .collect()
}

/// 单个学生的事务内提交: 快照 → 记录 → 出箱 → 审计
fn promote_record_tx(
    conn: &Connection,
    record: &mut StudentLifecycleRecord,
    plan: &PlannedPromotion,
    target: &BatchTarget,
    batch_id: &str,
    actor: &str,
    fee_assignments: &HashMap<String, String>,
) -> LifecycleResult<()> {
    let snapshot = AcademicSnapshot::capture(record, batch_id);
    AcademicSnapshotRepository::insert_tx(conn, &snapshot)?;

    let override_reason = record
        .status
        .override_grant()
        .map(|g| g.reason.as_str().to_string());

    record.placement = Some(plan.to.clone());
    record.academic_year = Some(target.academic_year.clone());
    record.set_status(LifecycleStatus::Eligible);
    record
        .set_selected(false)
        .map_err(|e| LifecycleError::invalid_state(&e.student_id, e.status))?;
    record.proposed = None;
    record.batch_id = None;
    record.updated_at = chrono::Local::now().naive_local();
    StudentLifecycleRepository::save_tx(conn, record)?;

    let payload = serde_json::json!({
        "batch_id": batch_id,
        "student_name": record.name,
        "from": plan.from,
        "from_year": plan.from_year,
        "to": plan.to,
        "to_year": target.academic_year,
    });
    let notice = OutboxMessage::pending(
        NotificationKind::PromotionNotice,
        &record.student_id,
        record.guardian_contact.clone(),
        payload.clone(),
    );
    NotificationOutboxRepository::enqueue_tx(conn, &notice)?;

    let mut log = ActionLog::new(ActionType::PromotionExecuted, actor, &record.student_id)
        .with_batch(batch_id)
        .with_payload(&serde_json::json!({
            "from": plan.from,
            "to": plan.to,
            "to_year": target.academic_year,
            "snapshot_id": snapshot.snapshot_id,
            "fee_assignment_id": fee_assignments.get(&record.student_id),
        }));
    if let Some(reason) = override_reason {
        log = log.with_reason(&reason);
    }
    ActionLogRepository::insert_tx(conn, &log)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_snapshot_parsed_into_audit_payload() {
        let value = parse_config_snapshot(r#"{"attendance_threshold_pct":"75"}"#).unwrap();
        assert_eq!(value["attendance_threshold_pct"], "75");
    }

    #[test]
    fn test_malformed_config_snapshot_is_config_error() {
        let err = parse_config_snapshot("{attendance_threshold_pct").unwrap_err();
        assert!(matches!(err, LifecycleError::Config(msg) if msg.contains("配置快照")));
    }
}
