// ==========================================
// 学籍生命周期 - 外部协作方接口
// ==========================================
// 花名册 / 容量 / 收费 / 通知 四个窄接口
// 红线: 引擎只在不持有数据库锁、不处于事务内时调用协作方
// ==========================================

use std::error::Error;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use crate::domain::capacity::ClassCapacity;
use crate::domain::roster::CohortMember;
use crate::domain::student::Placement;
use crate::repository::{FeeLedgerRepository, RosterDirectoryRepository};

/// 协作方调用结果
pub type CollaboratorResult<T> = Result<T, Box<dyn Error + Send + Sync>>;

// ==========================================
// 花名册服务
// ==========================================
pub trait RosterService: Send + Sync {
    /// 班级/学年花名册
    fn list_cohort(&self, class_id: &str, academic_year: &str) -> CollaboratorResult<Vec<CohortMember>>;

    /// 单个学生的花名册条目
    fn find_member(&self, student_id: &str) -> CollaboratorResult<Option<CohortMember>>;

    /// 改写学生编班（升级执行与补偿都走这里）
    fn apply_placement(
        &self,
        student_id: &str,
        placement: &Placement,
        academic_year: &str,
    ) -> CollaboratorResult<()>;
}

// ==========================================
// 容量服务（核心只读）
// ==========================================
pub trait CapacityService: Send + Sync {
    fn get_capacity(&self, class_id: &str, academic_year: &str) -> CollaboratorResult<ClassCapacity>;
}

// ==========================================
// 收费服务
// ==========================================
pub trait FeeService: Send + Sync {
    /// 分配新学年收费结构，返回分配ID
    fn assign_fee_structure(&self, student_id: &str, academic_year: &str) -> CollaboratorResult<String>;

    /// 撤销分配（补偿）
    fn revoke_fee_structure(&self, assignment_id: &str) -> CollaboratorResult<()>;
}

// ==========================================
// 通知服务
// ==========================================
pub trait NotificationService: Send + Sync {
    fn send_promotion_notice(
        &self,
        student_id: &str,
        guardian_contact: Option<&str>,
        payload: &JsonValue,
    ) -> CollaboratorResult<()>;

    fn send_archive_confirmation(
        &self,
        student_id: &str,
        guardian_contact: Option<&str>,
        payload: &JsonValue,
    ) -> CollaboratorResult<()>;
}

// ==========================================
// Collaborators - 协作方集合
// ==========================================
#[derive(Clone)]
pub struct Collaborators {
    pub roster: Arc<dyn RosterService>,
    pub capacity: Arc<dyn CapacityService>,
    pub fees: Arc<dyn FeeService>,
    pub notifier: Arc<dyn NotificationService>,
}

// ==========================================
// 内置 SQLite 适配
// ==========================================
impl RosterService for RosterDirectoryRepository {
    fn list_cohort(&self, class_id: &str, academic_year: &str) -> CollaboratorResult<Vec<CohortMember>> {
        Ok(RosterDirectoryRepository::list_cohort(self, class_id, academic_year)?)
    }

    fn find_member(&self, student_id: &str) -> CollaboratorResult<Option<CohortMember>> {
        Ok(RosterDirectoryRepository::find_member(self, student_id)?)
    }

    fn apply_placement(
        &self,
        student_id: &str,
        placement: &Placement,
        academic_year: &str,
    ) -> CollaboratorResult<()> {
        RosterDirectoryRepository::apply_placement(self, student_id, placement, academic_year)?;
        Ok(())
    }
}

impl CapacityService for RosterDirectoryRepository {
    fn get_capacity(&self, class_id: &str, academic_year: &str) -> CollaboratorResult<ClassCapacity> {
        Ok(RosterDirectoryRepository::get_capacity(self, class_id, academic_year)?)
    }
}

impl FeeService for FeeLedgerRepository {
    fn assign_fee_structure(&self, student_id: &str, academic_year: &str) -> CollaboratorResult<String> {
        Ok(self.assign(student_id, academic_year)?)
    }

    fn revoke_fee_structure(&self, assignment_id: &str) -> CollaboratorResult<()> {
        Ok(self.revoke(assignment_id)?)
    }
}

/// 只写日志的通知实现（无外部网关时使用）
#[derive(Debug, Default, Clone)]
pub struct LoggingNotificationService;

impl NotificationService for LoggingNotificationService {
    fn send_promotion_notice(
        &self,
        student_id: &str,
        guardian_contact: Option<&str>,
        payload: &JsonValue,
    ) -> CollaboratorResult<()> {
        tracing::info!(
            target: "notification",
            student_id,
            guardian_contact = guardian_contact.unwrap_or("-"),
            payload = %payload,
            "升级通知"
        );
        Ok(())
    }

    fn send_archive_confirmation(
        &self,
        student_id: &str,
        guardian_contact: Option<&str>,
        payload: &JsonValue,
    ) -> CollaboratorResult<()> {
        tracing::info!(
            target: "notification",
            student_id,
            guardian_contact = guardian_contact.unwrap_or("-"),
            payload = %payload,
            "归档确认"
        );
        Ok(())
    }
}
