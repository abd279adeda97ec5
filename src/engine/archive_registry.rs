// ==========================================
// 学籍生命周期 - 校友归档
// ==========================================
// 红线: 归档条目永不删除；恢复学籍只追加注记
// 红线: 状态变更与审计写入在同一事务内
// 约束: 被进行中批次占用的学生不可归档 (Conflict)
// ==========================================

use std::collections::HashSet;

use rusqlite::Connection;
use tracing::instrument;

use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::archive::{ArchiveEntry, Reactivation};
use crate::domain::notification::{NotificationKind, OutboxMessage};
use crate::domain::roster::CohortMember;
use crate::domain::student::{LifecycleStatus, StudentLifecycleRecord};
use crate::domain::types::{ExitStatus, Reason};
use crate::engine::collaborators::Collaborators;
use crate::engine::eligibility::EligibilityEvaluator;
use crate::engine::error::{LifecycleError, LifecycleResult, ValidationFailure};
use crate::engine::repositories::LifecycleRepositories;
use crate::perf::PerfGuard;
use crate::repository::{
    ActionLogRepository, ArchiveEntryRepository, NotificationOutboxRepository,
    RecordClaimRepository, StudentLifecycleRepository,
};

pub struct ArchiveRegistry {
    repos: LifecycleRepositories,
    collaborators: Collaborators,
}

impl ArchiveRegistry {
    pub fn new(repos: LifecycleRepositories, collaborators: Collaborators) -> Self {
        Self {
            repos,
            collaborators,
        }
    }

    /// 整班归档
    ///
    /// `expected_count` 为操作员界面上看到的人数，与实际在读人数不一致即拒绝
    ///
    /// # 错误
    /// - `NotFound`: 班级内没有在读学生
    /// - `Validation(CountMismatch)`: 人数不一致
    /// - `Conflict`: 有学生被进行中的升级批次占用
    #[instrument(skip(self), fields(source_class = %source_class, source_year = %source_year))]
    pub fn bulk_archive(
        &self,
        source_class: &str,
        source_year: &str,
        exit_status: ExitStatus,
        expected_count: usize,
        actor: &str,
    ) -> LifecycleResult<Vec<ArchiveEntry>> {
        if actor.trim().is_empty() {
            return Err(ValidationFailure::BlankField("actor").into());
        }
        let _perf = PerfGuard::new("archive.bulk").with_label(&format!("{}/{}", source_class, source_year));

        let members = self
            .collaborators
            .roster
            .list_cohort(source_class, source_year)
            .map_err(|e| LifecycleError::Collaborator {
                service: "roster",
                message: e.to_string(),
            })?;
        for m in &members {
            EligibilityEvaluator::validate_attendance(&m.student_id, m.performance.attendance_pct)?;
        }

        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        let active = resolve_active_cohort_tx(&tx, source_class, source_year, members)?;
        if active.is_empty() {
            return Err(LifecycleError::not_found(
                "Cohort",
                &format!("{}/{}", source_class, source_year),
            ));
        }
        if active.len() != expected_count {
            return Err(ValidationFailure::CountMismatch {
                expected: expected_count,
                actual: active.len(),
            }
            .into());
        }

        let ids: Vec<String> = active.iter().map(|r| r.student_id.clone()).collect();
        let claims = RecordClaimRepository::find_claims_tx(&tx, &ids)?;
        if let Some((student_id, batch_id)) = claims.first() {
            return Err(LifecycleError::conflict(
                student_id,
                format!("学生被升级批次 {} 占用，不可归档", batch_id),
            ));
        }

        let mut entries = Vec::with_capacity(active.len());
        for record in active {
            entries.push(archive_record_tx(&tx, record, exit_status, actor.trim())?);
        }
        tx.commit()?;

        tracing::info!(count = entries.len(), exit_status = %exit_status, "整班归档完成");
        Ok(entries)
    }

    /// 单个学生归档
    #[instrument(skip(self), fields(student_id = %student_id))]
    pub fn archive_student(
        &self,
        student_id: &str,
        exit_status: ExitStatus,
        actor: &str,
    ) -> LifecycleResult<ArchiveEntry> {
        if actor.trim().is_empty() {
            return Err(ValidationFailure::BlankField("actor").into());
        }

        let existing = self.repos.student_repo.find_by_id(student_id)?;
        let record = match existing {
            Some(record) => record,
            None => {
                let member = self
                    .collaborators
                    .roster
                    .find_member(student_id)
                    .map_err(|e| LifecycleError::Collaborator {
                        service: "roster",
                        message: e.to_string(),
                    })?
                    .ok_or_else(|| LifecycleError::not_found("StudentLifecycleRecord", student_id))?;
                EligibilityEvaluator::validate_attendance(&member.student_id, member.performance.attendance_pct)?;
                record_from_member(member)
            }
        };

        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        // 锁内重新读取，避免与批次并发
        let record = match StudentLifecycleRepository::find_by_id_tx(&tx, student_id)? {
            Some(current) => current,
            None => record,
        };
        if record.status.is_archived() {
            return Err(LifecycleError::invalid_state(student_id, "学生已归档"));
        }
        if let Some(batch_id) = RecordClaimRepository::find_claim_tx(&tx, student_id)? {
            return Err(LifecycleError::conflict(
                student_id,
                format!("学生被升级批次 {} 占用，不可归档", batch_id),
            ));
        }

        let entry = archive_record_tx(&tx, record, exit_status, actor.trim())?;
        tx.commit()?;

        tracing::info!(archive_id = %entry.archive_id, "学生已归档");
        Ok(entry)
    }

    /// 恢复学籍
    ///
    /// 生成新的在读记录（Eligible，编班待定），原归档条目保留并追加注记
    ///
    /// # 错误
    /// - `Validation(EmptyReason)`: 原因为空
    /// - `InvalidState`: 学生当前不是归档状态
    /// - `NotFound`: 没有可恢复的归档条目
    #[instrument(skip(self, reason), fields(student_id = %student_id, restored_by = %restored_by))]
    pub fn reactivate(
        &self,
        student_id: &str,
        reason: &str,
        restored_by: &str,
    ) -> LifecycleResult<StudentLifecycleRecord> {
        let reason = Reason::new(reason).ok_or(ValidationFailure::EmptyReason)?;
        if restored_by.trim().is_empty() {
            return Err(ValidationFailure::BlankField("restored_by").into());
        }

        let conn = self.repos.lock()?;
        let tx = conn.unchecked_transaction()?;

        let existing = StudentLifecycleRepository::find_by_id_tx(&tx, student_id)?;
        if let Some(record) = &existing {
            if !record.status.is_archived() {
                return Err(LifecycleError::invalid_state(
                    student_id,
                    format!("仅归档学生可恢复学籍，当前状态 {}", record.status.as_str()),
                ));
            }
        }
        let entry = ArchiveEntryRepository::find_open_by_student_tx(&tx, student_id)?
            .ok_or_else(|| LifecycleError::not_found("ArchiveEntry", student_id))?;
        let Some(mut record) = existing else {
            return Err(LifecycleError::not_found("StudentLifecycleRecord", student_id));
        };

        let reactivation = Reactivation {
            reason: reason.clone(),
            restored_by: restored_by.trim().to_string(),
            restored_at: chrono::Local::now().naive_local(),
        };
        ArchiveEntryRepository::annotate_reactivation_tx(&tx, &entry.archive_id, &reactivation)?;

        record.set_status(LifecycleStatus::Eligible);
        record.placement = None;
        record.academic_year = None;
        record.proposed = None;
        record.batch_id = None;
        record.restored_from_archive_id = Some(entry.archive_id.clone());
        record.updated_at = reactivation.restored_at;
        StudentLifecycleRepository::save_tx(&tx, &record)?;

        let log = ActionLog::new(ActionType::StudentReactivated, restored_by.trim(), student_id)
            .with_reason(reason.as_str())
            .with_payload(&serde_json::json!({
                "archive_id": entry.archive_id,
                "exit_status": entry.exit_status,
            }));
        ActionLogRepository::insert_tx(&tx, &log)?;

        tx.commit()?;

        tracing::info!(archive_id = %entry.archive_id, "学籍已恢复");
        Ok(record)
    }

    /// 学生归档历史
    pub fn history(&self, student_id: &str) -> LifecycleResult<Vec<ArchiveEntry>> {
        Ok(self.repos.archive_repo.find_by_student(student_id)?)
    }

    /// 班级/学年归档名单
    pub fn cohort_entries(&self, class_id: &str, academic_year: &str) -> LifecycleResult<Vec<ArchiveEntry>> {
        Ok(self.repos.archive_repo.find_by_cohort(class_id, academic_year)?)
    }
}

/// 合并花名册与生命周期记录，得到仍在读的学生
///
/// 尚无记录的学生按花名册建档；已归档或已转出本班的跳过
fn resolve_active_cohort_tx(
    conn: &Connection,
    class_id: &str,
    academic_year: &str,
    members: Vec<CohortMember>,
) -> LifecycleResult<Vec<StudentLifecycleRecord>> {
    let mut active = Vec::with_capacity(members.len());
    let mut seen: HashSet<String> = HashSet::new();

    for m in members {
        seen.insert(m.student_id.clone());
        match StudentLifecycleRepository::find_by_id_tx(conn, &m.student_id)? {
            Some(record) if record.status.is_archived() => continue,
            Some(record) => {
                let in_cohort = record.placement.as_ref().map(|p| p.class_id.as_str()) == Some(class_id)
                    && record.academic_year.as_deref() == Some(academic_year);
                if in_cohort || record.placement.is_none() {
                    active.push(record);
                }
            }
            None => active.push(record_from_member(m)),
        }
    }

    for record in StudentLifecycleRepository::find_active_by_cohort_tx(conn, class_id, academic_year)? {
        if !seen.contains(&record.student_id) {
            active.push(record);
        }
    }
    Ok(active)
}

fn record_from_member(m: CohortMember) -> StudentLifecycleRecord {
    let mut record = StudentLifecycleRecord::new(
        &m.student_id,
        &m.name,
        Some(m.placement),
        Some(m.academic_year),
        m.performance,
        LifecycleStatus::Eligible,
    );
    record.guardian_contact = m.guardian_contact;
    record
}

/// 单个学生的事务内归档: 条目 → 记录 → 出箱 → 审计
fn archive_record_tx(
    conn: &Connection,
    mut record: StudentLifecycleRecord,
    exit_status: ExitStatus,
    actor: &str,
) -> LifecycleResult<ArchiveEntry> {
    let entry = ArchiveEntry::new(
        &record.student_id,
        &record.name,
        record.placement.clone(),
        record.academic_year.clone(),
        exit_status,
        actor,
    );
    ArchiveEntryRepository::insert_tx(conn, &entry)?;

    record.set_status(LifecycleStatus::Archived {
        archive_id: entry.archive_id.clone(),
    });
    record.placement = None;
    record.academic_year = None;
    record.proposed = None;
    record.batch_id = None;
    record.updated_at = entry.archived_at;
    StudentLifecycleRepository::save_tx(conn, &record)?;

    let payload = serde_json::json!({
        "archive_id": entry.archive_id,
        "student_name": entry.student_name,
        "exit_status": exit_status,
        "archived_from": entry.archived_from,
        "archived_year": entry.archived_year,
    });
    let message = OutboxMessage::pending(
        NotificationKind::ArchiveConfirmation,
        &record.student_id,
        record.guardian_contact.clone(),
        payload.clone(),
    );
    NotificationOutboxRepository::enqueue_tx(conn, &message)?;

    let log = ActionLog::new(ActionType::StudentArchived, actor, &record.student_id)
        .with_payload(&payload);
    ActionLogRepository::insert_tx(conn, &log)?;

    Ok(entry)
}
