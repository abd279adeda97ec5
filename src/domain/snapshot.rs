// ==========================================
// 学籍生命周期 - 学年成绩快照
// ==========================================
// 升级执行时归档上一学年的编班与成绩，只写不改
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::student::{Placement, PerformanceInputs, StudentLifecycleRecord};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcademicSnapshot {
    pub snapshot_id: String,
    pub student_id: String,
    pub batch_id: String,
    pub placement: Option<Placement>,
    pub academic_year: Option<String>,
    pub performance: PerformanceInputs,
    pub final_status: String,
    pub override_id: Option<String>,
    pub captured_at: NaiveDateTime,
}

impl AcademicSnapshot {
    /// 从升级前的记录截取快照
    pub fn capture(record: &StudentLifecycleRecord, batch_id: &str) -> Self {
        Self {
            snapshot_id: uuid::Uuid::new_v4().to_string(),
            student_id: record.student_id.clone(),
            batch_id: batch_id.to_string(),
            placement: record.placement.clone(),
            academic_year: record.academic_year.clone(),
            performance: record.performance,
            final_status: record.status.as_str().to_string(),
            override_id: record.status.override_grant().map(|g| g.override_id.clone()),
            captured_at: chrono::Local::now().naive_local(),
        }
    }
}
