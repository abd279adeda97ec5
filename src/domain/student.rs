// ==========================================
// 学籍生命周期 - 学生生命周期记录
// ==========================================
// 红线: Conditional 必须携带例外升级授权 (结构上保证)
// 红线: selected_for_batch = true ⇒ 状态 ∈ {Eligible, Conditional}
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::{ExamResult, Reason};

// ==========================================
// Placement - 班级/分班/学号
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub class_id: String,
    pub section: String,
    pub roll: u32,
}

impl Placement {
    pub fn new(class_id: &str, section: &str, roll: u32) -> Self {
        Self {
            class_id: class_id.to_string(),
            section: section.to_string(),
            roll,
        }
    }
}

// ==========================================
// PerformanceInputs - 资格判定输入
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceInputs {
    pub attendance_pct: f64, // 出勤率 0-100
    pub academic_score: f64, // 学业成绩（仅展示，不参与判定）
    pub exam_result: ExamResult,
}

// ==========================================
// OverrideGrant - 例外升级授权（挂在 Conditional 上）
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideGrant {
    pub override_id: String,
    pub reason: Reason,
    pub approved_by: String,
}

// ==========================================
// LifecycleStatus - 生命周期状态
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleStatus {
    Eligible,
    Retained,
    Conditional { grant: OverrideGrant },
    Archived { archive_id: String },
}

impl LifecycleStatus {
    /// 数据库存储值
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleStatus::Eligible => "ELIGIBLE",
            LifecycleStatus::Retained => "RETAINED",
            LifecycleStatus::Conditional { .. } => "CONDITIONAL",
            LifecycleStatus::Archived { .. } => "ARCHIVED",
        }
    }

    /// 是否允许进入升级批次
    pub fn is_selectable(&self) -> bool {
        matches!(
            self,
            LifecycleStatus::Eligible | LifecycleStatus::Conditional { .. }
        )
    }

    pub fn is_archived(&self) -> bool {
        matches!(self, LifecycleStatus::Archived { .. })
    }

    pub fn override_grant(&self) -> Option<&OverrideGrant> {
        match self {
            LifecycleStatus::Conditional { grant } => Some(grant),
            _ => None,
        }
    }
}

/// 选中状态违反不变量
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionRejected {
    pub student_id: String,
    pub status: &'static str,
}

// ==========================================
// StudentLifecycleRecord - 学生生命周期记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentLifecycleRecord {
    // ===== 身份 =====
    pub student_id: String,
    pub name: String,

    // ===== 当前编班（恢复学籍后为空，待重新编班）=====
    pub placement: Option<Placement>,
    pub academic_year: Option<String>,

    // ===== 判定输入 =====
    pub performance: PerformanceInputs,

    // ===== 状态 =====
    pub status: LifecycleStatus,
    pub proposed: Option<Placement>,
    selected_for_batch: bool,
    pub batch_id: Option<String>,

    // ===== 扩展字段 =====
    pub guardian_contact: Option<String>,
    pub restored_from_archive_id: Option<String>, // 弱引用: 仅用于查找
    pub updated_at: NaiveDateTime,
}

impl StudentLifecycleRecord {
    /// 新建在读记录（未选中）
    pub fn new(
        student_id: &str,
        name: &str,
        placement: Option<Placement>,
        academic_year: Option<String>,
        performance: PerformanceInputs,
        status: LifecycleStatus,
    ) -> Self {
        Self {
            student_id: student_id.to_string(),
            name: name.to_string(),
            placement,
            academic_year,
            performance,
            status,
            proposed: None,
            selected_for_batch: false,
            batch_id: None,
            guardian_contact: None,
            restored_from_archive_id: None,
            updated_at: chrono::Local::now().naive_local(),
        }
    }

    pub fn is_selected(&self) -> bool {
        self.selected_for_batch
    }

    /// 设置选中状态（保证不变量）
    pub fn set_selected(&mut self, selected: bool) -> Result<(), SelectionRejected> {
        if selected && !self.status.is_selectable() {
            return Err(SelectionRejected {
                student_id: self.student_id.clone(),
                status: self.status.as_str(),
            });
        }
        self.selected_for_batch = selected;
        Ok(())
    }

    /// 变更状态；若新状态不可选则自动取消选中
    pub fn set_status(&mut self, status: LifecycleStatus) {
        if !status.is_selectable() {
            self.selected_for_batch = false;
        }
        self.status = status;
    }

    /// 数据库行映射专用：不经校验直接还原选中标记（表上 CHECK 约束兜底）
    pub(crate) fn restore_selected_flag(&mut self, selected: bool) {
        self.selected_for_batch = selected && self.status.is_selectable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(status: LifecycleStatus) -> StudentLifecycleRecord {
        StudentLifecycleRecord::new(
            "S1",
            "Asha",
            Some(Placement::new("G5", "A", 1)),
            Some("2025-2026".to_string()),
            PerformanceInputs {
                attendance_pct: 92.0,
                academic_score: 81.0,
                exam_result: ExamResult::Pass,
            },
            status,
        )
    }

    #[test]
    fn test_retained_cannot_be_selected() {
        let mut r = record(LifecycleStatus::Retained);
        let err = r.set_selected(true).unwrap_err();
        assert_eq!(err.status, "RETAINED");
        assert!(!r.is_selected());
    }

    #[test]
    fn test_conditional_can_be_selected_and_deselected() {
        let grant = OverrideGrant {
            override_id: "O1".to_string(),
            reason: Reason::new("Medical exemption").unwrap(),
            approved_by: "principal".to_string(),
        };
        let mut r = record(LifecycleStatus::Conditional { grant });
        r.set_selected(true).unwrap();
        assert!(r.is_selected());
        r.set_selected(false).unwrap();
        assert!(!r.is_selected());
        assert!(r.status.override_grant().is_some());
    }

    #[test]
    fn test_status_change_to_retained_clears_selection() {
        let mut r = record(LifecycleStatus::Eligible);
        r.set_selected(true).unwrap();
        r.set_status(LifecycleStatus::Retained);
        assert!(!r.is_selected());
    }
}
