// ==========================================
// 学籍生命周期 - 操作员 API
// ==========================================
// 职责: 入参校验、操作员解析、调用引擎、错误转换
// 红线: API 层不含业务规则，状态变更全部交给引擎
// ==========================================

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::api::error::{ApiError, ApiResult};
use crate::config::{config_keys, ConfigManager, LifecycleConfigReader};
use crate::domain::action_log::{ActionLog, ActionType};
use crate::domain::archive::ArchiveEntry;
use crate::domain::batch::PromotionBatch;
use crate::domain::notification::OutboxMessage;
use crate::domain::override_record::OverrideRecord;
use crate::domain::snapshot::AcademicSnapshot;
use crate::domain::student::StudentLifecycleRecord;
use crate::domain::types::ExitStatus;
use crate::engine::{
    ArchiveRegistry, BatchView, Collaborators, DispatchReport, ExecutionReport,
    LifecycleRepositories, NotificationDispatcher, OverrideManager, OverrideOutcome,
    PromotionBatchExecutor,
};
use crate::importer::{RosterImportSummary, RosterImporter};
use crate::repository::RosterDirectoryRepository;

/// 审计查询默认条数
pub const DEFAULT_AUDIT_LIMIT: i32 = 50;

/// 通知投递默认批量
pub const DEFAULT_DISPATCH_LIMIT: usize = 100;

// ==========================================
// 学生档案视图
// ==========================================
#[derive(Debug, Clone, Serialize)]
pub struct StudentProfile {
    pub student_id: String,
    pub record: Option<StudentLifecycleRecord>,
    pub overrides: Vec<OverrideRecord>,
    pub archives: Vec<ArchiveEntry>,
    pub snapshots: Vec<AcademicSnapshot>,
    pub claimed_by_batch: Option<String>,
    pub notifications: Vec<OutboxMessage>,
}

// ==========================================
// LifecycleApi
// ==========================================
pub struct LifecycleApi {
    repos: LifecycleRepositories,
    executor: PromotionBatchExecutor,
    overrides: OverrideManager,
    archives: ArchiveRegistry,
    dispatcher: NotificationDispatcher,
    importer: RosterImporter,
    config: Arc<ConfigManager>,
}

impl LifecycleApi {
    /// 基于共享连接装配引擎
    pub fn new(
        conn: Arc<Mutex<Connection>>,
        collaborators: Collaborators,
        config: Arc<ConfigManager>,
    ) -> Self {
        let repos = LifecycleRepositories::new(conn.clone());
        let config_reader: Arc<dyn LifecycleConfigReader> = config.clone();

        Self {
            executor: PromotionBatchExecutor::new(
                repos.clone(),
                collaborators.clone(),
                config_reader.clone(),
            ),
            overrides: OverrideManager::new(repos.clone()),
            archives: ArchiveRegistry::new(repos.clone(), collaborators.clone()),
            dispatcher: NotificationDispatcher::new(
                repos.outbox_repo.clone(),
                collaborators.notifier.clone(),
                config_reader,
            ),
            importer: RosterImporter::new(Arc::new(RosterDirectoryRepository::new(conn))),
            repos,
            config,
        }
    }

    // ==========================================
    // 公共工具
    // ==========================================

    /// 未指定操作员时使用配置的默认操作员
    pub fn resolve_actor(&self, actor: Option<&str>) -> ApiResult<String> {
        match actor.map(str::trim).filter(|a| !a.is_empty()) {
            Some(a) => Ok(a.to_string()),
            None => self
                .config
                .get_default_operator()
                .map_err(|e| ApiError::InternalError(format!("读取默认操作员失败: {}", e))),
        }
    }

    // ==========================================
    // 升级批次
    // ==========================================

    pub fn select_cohort(
        &self,
        source_class: &str,
        source_year: &str,
        actor: Option<&str>,
    ) -> ApiResult<BatchView> {
        require("source_class", source_class)?;
        require("source_year", source_year)?;
        let actor = self.resolve_actor(actor)?;
        Ok(self.executor.select_cohort(source_class.trim(), source_year.trim(), &actor)?)
    }

    pub fn set_target(
        &self,
        batch_id: &str,
        expected_revision: i64,
        target_class: &str,
        target_year: &str,
        actor: Option<&str>,
    ) -> ApiResult<BatchView> {
        require("batch_id", batch_id)?;
        require("target_class", target_class)?;
        require("target_year", target_year)?;
        let actor = self.resolve_actor(actor)?;
        Ok(self.executor.set_target(
            batch_id,
            expected_revision,
            target_class.trim(),
            target_year.trim(),
            &actor,
        )?)
    }

    pub fn toggle_selection(
        &self,
        batch_id: &str,
        expected_revision: i64,
        student_id: &str,
        actor: Option<&str>,
    ) -> ApiResult<BatchView> {
        require("batch_id", batch_id)?;
        require("student_id", student_id)?;
        let actor = self.resolve_actor(actor)?;
        Ok(self
            .executor
            .toggle_selection(batch_id, expected_revision, student_id, &actor)?)
    }

    pub fn bulk_select(
        &self,
        batch_id: &str,
        expected_revision: i64,
        include: bool,
        actor: Option<&str>,
    ) -> ApiResult<BatchView> {
        require("batch_id", batch_id)?;
        let actor = self.resolve_actor(actor)?;
        Ok(self.executor.bulk_select(batch_id, expected_revision, include, &actor)?)
    }

    pub fn set_proposed_placement(
        &self,
        batch_id: &str,
        expected_revision: i64,
        student_id: &str,
        section: &str,
        roll: u32,
        actor: Option<&str>,
    ) -> ApiResult<BatchView> {
        require("batch_id", batch_id)?;
        require("student_id", student_id)?;
        require("section", section)?;
        let actor = self.resolve_actor(actor)?;
        Ok(self.executor.set_proposed_placement(
            batch_id,
            expected_revision,
            student_id,
            section.trim(),
            roll,
            &actor,
        )?)
    }

    pub fn refresh_cohort(
        &self,
        batch_id: &str,
        expected_revision: i64,
        actor: Option<&str>,
    ) -> ApiResult<BatchView> {
        require("batch_id", batch_id)?;
        let actor = self.resolve_actor(actor)?;
        Ok(self.executor.refresh_cohort(batch_id, expected_revision, &actor)?)
    }

    /// 确认批次；可顺带设置目标班级/学年（设置会推进 revision）
    pub fn confirm_batch(
        &self,
        batch_id: &str,
        expected_revision: i64,
        target: Option<(&str, &str)>,
        actor: Option<&str>,
    ) -> ApiResult<PromotionBatch> {
        require("batch_id", batch_id)?;
        let actor = self.resolve_actor(actor)?;

        let revision = match target {
            Some((class_id, year)) => {
                require("target_class", class_id)?;
                require("target_year", year)?;
                let view = self.executor.set_target(
                    batch_id,
                    expected_revision,
                    class_id.trim(),
                    year.trim(),
                    &actor,
                )?;
                view.batch.revision
            }
            None => expected_revision,
        };

        Ok(self.executor.confirm(batch_id, revision, &actor)?)
    }

    pub fn execute_batch(
        &self,
        batch_id: &str,
        expected_revision: i64,
        actor: Option<&str>,
    ) -> ApiResult<ExecutionReport> {
        require("batch_id", batch_id)?;
        let actor = self.resolve_actor(actor)?;
        Ok(self.executor.execute(batch_id, expected_revision, &actor)?)
    }

    pub fn reject_batch(
        &self,
        batch_id: &str,
        expected_revision: i64,
        reason: &str,
        actor: Option<&str>,
    ) -> ApiResult<BatchView> {
        require("batch_id", batch_id)?;
        let actor = self.resolve_actor(actor)?;
        Ok(self
            .executor
            .reject_batch(batch_id, expected_revision, reason, &actor)?)
    }

    pub fn reopen_batch(
        &self,
        batch_id: &str,
        expected_revision: i64,
        actor: Option<&str>,
    ) -> ApiResult<BatchView> {
        require("batch_id", batch_id)?;
        let actor = self.resolve_actor(actor)?;
        Ok(self.executor.reopen_batch(batch_id, expected_revision, &actor)?)
    }

    pub fn get_batch(&self, batch_id: &str) -> ApiResult<BatchView> {
        require("batch_id", batch_id)?;
        Ok(self.executor.load_batch(batch_id)?)
    }

    pub fn list_batches(&self, source_class: &str, source_year: &str) -> ApiResult<Vec<PromotionBatch>> {
        require("source_class", source_class)?;
        require("source_year", source_year)?;
        Ok(self.executor.list_batches(source_class.trim(), source_year.trim())?)
    }

    // ==========================================
    // 例外升级
    // ==========================================

    pub fn apply_override(
        &self,
        student_id: &str,
        reason: &str,
        approved_by: Option<&str>,
        expected_revision: i64,
    ) -> ApiResult<OverrideOutcome> {
        require("student_id", student_id)?;
        let approver = self.resolve_actor(approved_by)?;
        Ok(self
            .overrides
            .apply_override(student_id, reason, &approver, expected_revision)?)
    }

    pub fn revoke_override(
        &self,
        student_id: &str,
        expected_revision: i64,
        actor: Option<&str>,
    ) -> ApiResult<OverrideOutcome> {
        require("student_id", student_id)?;
        let actor = self.resolve_actor(actor)?;
        Ok(self
            .overrides
            .revoke_override(student_id, &actor, expected_revision)?)
    }

    // ==========================================
    // 归档 / 恢复学籍
    // ==========================================

    pub fn bulk_archive(
        &self,
        source_class: &str,
        source_year: &str,
        exit_status: ExitStatus,
        expected_count: usize,
        actor: Option<&str>,
    ) -> ApiResult<Vec<ArchiveEntry>> {
        require("source_class", source_class)?;
        require("source_year", source_year)?;
        let actor = self.resolve_actor(actor)?;
        Ok(self.archives.bulk_archive(
            source_class.trim(),
            source_year.trim(),
            exit_status,
            expected_count,
            &actor,
        )?)
    }

    pub fn archive_student(
        &self,
        student_id: &str,
        exit_status: ExitStatus,
        actor: Option<&str>,
    ) -> ApiResult<ArchiveEntry> {
        require("student_id", student_id)?;
        let actor = self.resolve_actor(actor)?;
        Ok(self.archives.archive_student(student_id, exit_status, &actor)?)
    }

    pub fn reactivate(
        &self,
        student_id: &str,
        reason: &str,
        restored_by: Option<&str>,
    ) -> ApiResult<StudentLifecycleRecord> {
        require("student_id", student_id)?;
        let restored_by = self.resolve_actor(restored_by)?;
        Ok(self.archives.reactivate(student_id, reason, &restored_by)?)
    }

    pub fn archived_cohort(&self, class_id: &str, academic_year: &str) -> ApiResult<Vec<ArchiveEntry>> {
        require("class_id", class_id)?;
        require("academic_year", academic_year)?;
        Ok(self.archives.cohort_entries(class_id.trim(), academic_year.trim())?)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 学生完整档案（记录 + 例外升级 + 归档历史 + 学年快照 + 占用 + 通知）
    pub fn get_student(&self, student_id: &str) -> ApiResult<StudentProfile> {
        require("student_id", student_id)?;

        let record = self.repos.student_repo.find_by_id(student_id)?;
        let overrides = self.repos.override_repo.find_by_student(student_id)?;
        let archives = self.archives.history(student_id)?;
        let snapshots = self.repos.snapshot_repo.find_by_student(student_id)?;
        let claimed_by_batch = self.repos.claim_repo.find_claim(student_id)?;
        let notifications = self.repos.outbox_repo.list_by_student(student_id)?;

        if record.is_none() && archives.is_empty() {
            return Err(ApiError::NotFound {
                entity: "StudentLifecycleRecord".to_string(),
                id: student_id.to_string(),
            });
        }

        Ok(StudentProfile {
            student_id: student_id.to_string(),
            record,
            overrides,
            archives,
            snapshots,
            claimed_by_batch,
            notifications,
        })
    }

    /// 实体（学生或批次）的审计轨迹，含以该批次为归属的条目
    pub fn audit_trail(&self, entity_id: &str) -> ApiResult<Vec<ActionLog>> {
        require("entity_id", entity_id)?;
        let mut logs = self.repos.action_log_repo.find_by_entity(entity_id)?;
        for log in self.repos.action_log_repo.find_by_batch(entity_id)? {
            if !logs.iter().any(|l| l.action_id == log.action_id) {
                logs.push(log);
            }
        }
        logs.sort_by(|a, b| a.action_ts.cmp(&b.action_ts));
        Ok(logs)
    }

    pub fn audit_by_actor(&self, actor: &str, limit: Option<i32>) -> ApiResult<Vec<ActionLog>> {
        require("actor", actor)?;
        Ok(self
            .repos
            .action_log_repo
            .find_by_actor(actor.trim(), normalize_limit(limit)?)?)
    }

    pub fn audit_by_action(&self, action_type: &str, limit: Option<i32>) -> ApiResult<Vec<ActionLog>> {
        let parsed = ActionType::parse(action_type.trim()).ok_or_else(|| ApiError::ValidationError {
            message: format!("未知操作类型: {}", action_type),
            field: Some("action_type".to_string()),
            row: None,
        })?;
        Ok(self
            .repos
            .action_log_repo
            .find_by_action_type(parsed.as_str(), normalize_limit(limit)?)?)
    }

    pub fn recent_audit(&self, limit: Option<i32>) -> ApiResult<Vec<ActionLog>> {
        Ok(self.repos.action_log_repo.find_recent(normalize_limit(limit)?)?)
    }

    // ==========================================
    // 运维
    // ==========================================

    /// 投递待发送通知（提交后调用）
    pub fn dispatch_notifications(&self, limit: Option<usize>) -> ApiResult<DispatchReport> {
        let limit = limit.unwrap_or(DEFAULT_DISPATCH_LIMIT);
        if limit == 0 {
            return Err(ApiError::ValidationError {
                message: "limit 必须大于 0".to_string(),
                field: Some("limit".to_string()),
                row: None,
            });
        }
        Ok(self.dispatcher.dispatch_pending(limit)?)
    }

    /// 导入花名册 CSV 到内置目录
    pub fn import_roster<P: AsRef<Path>>(&self, path: P) -> ApiResult<RosterImportSummary> {
        Ok(self.importer.import_file(path)?)
    }

    /// 仅接受已知配置键
    pub fn set_config(&self, key: &str, value: &str) -> ApiResult<JsonValue> {
        require("key", key)?;
        let key = key.trim();
        if !config_keys::DEFAULTS.iter().any(|(known, _)| *known == key) {
            return Err(ApiError::ValidationError {
                message: format!("未知配置键: {}", key),
                field: Some("key".to_string()),
                row: None,
            });
        }
        self.config
            .set_global(key, value.trim())
            .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
        self.get_config()
    }

    /// 当前生效配置（含默认值）
    pub fn get_config(&self) -> ApiResult<JsonValue> {
        let raw = self
            .config
            .get_config_snapshot()
            .map_err(|e| ApiError::InternalError(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| ApiError::InternalError(e.to_string()))
    }
}

// ==========================================
// 入参校验
// ==========================================

fn require(field: &str, value: &str) -> ApiResult<()> {
    if value.trim().is_empty() {
        return Err(ApiError::ValidationError {
            message: format!("{} 不能为空", field),
            field: Some(field.to_string()),
            row: None,
        });
    }
    Ok(())
}

fn normalize_limit(limit: Option<i32>) -> ApiResult<i32> {
    match limit {
        None => Ok(DEFAULT_AUDIT_LIMIT),
        Some(n) if n > 0 => Ok(n),
        Some(n) => Err(ApiError::ValidationError {
            message: format!("limit 必须大于 0: {}", n),
            field: Some("limit".to_string()),
            row: None,
        }),
    }
}
