// ==========================================
// 学籍生命周期 - 校友归档
// ==========================================
// 红线: 归档条目永不删除，只允许追加恢复学籍注记
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::student::Placement;
use crate::domain::types::{ExitStatus, Reason};

// ==========================================
// Reactivation - 恢复学籍注记
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactivation {
    pub reason: Reason,
    pub restored_by: String,
    pub restored_at: NaiveDateTime,
}

// ==========================================
// ArchiveEntry - 归档条目
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub archive_id: String,
    pub student_id: String,
    pub student_name: String,
    pub archived_from: Option<Placement>,
    pub archived_year: Option<String>,
    pub exit_status: ExitStatus,
    pub archived_at: NaiveDateTime,
    pub archived_by: String,
    pub reactivation: Option<Reactivation>,
}

impl ArchiveEntry {
    pub fn new(
        student_id: &str,
        student_name: &str,
        archived_from: Option<Placement>,
        archived_year: Option<String>,
        exit_status: ExitStatus,
        archived_by: &str,
    ) -> Self {
        Self {
            archive_id: uuid::Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            student_name: student_name.to_string(),
            archived_from,
            archived_year,
            exit_status,
            archived_at: chrono::Local::now().naive_local(),
            archived_by: archived_by.to_string(),
            reactivation: None,
        }
    }

    pub fn is_reactivated(&self) -> bool {
        self.reactivation.is_some()
    }
}
