// ==========================================
// 学籍生命周期 - 升级批次
// ==========================================
// 红线: 批次只持有学生ID引用集合，不复制学生记录
// 红线: revision 为并发令牌，每次变更 +1
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::types::BatchStatus;

// ==========================================
// BatchTarget - 目标班级/学年
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchTarget {
    pub class_id: String,
    pub academic_year: String,
}

// ==========================================
// PromotionBatch - 升级批次
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionBatch {
    pub batch_id: String,
    pub source_class: String,
    pub source_year: String,
    pub target: Option<BatchTarget>,
    pub status: BatchStatus,
    pub revision: i64,
    pub owner: String, // 持有批次的操作员会话

    pub confirmed_projection: Option<u32>, // 确认时的预计在读人数（提示用）
    pub rejected_reason: Option<String>,

    // 候选学生（有序，按花名册顺序）
    pub member_ids: Vec<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub executed_at: Option<NaiveDateTime>,
}

impl PromotionBatch {
    /// 新建 Draft 批次（revision = 1）
    pub fn new_draft(source_class: &str, source_year: &str, owner: &str, member_ids: Vec<String>) -> Self {
        let now = chrono::Local::now().naive_local();
        Self {
            batch_id: uuid::Uuid::new_v4().to_string(),
            source_class: source_class.to_string(),
            source_year: source_year.to_string(),
            target: None,
            status: BatchStatus::Draft,
            revision: 1,
            owner: owner.to_string(),
            confirmed_projection: None,
            rejected_reason: None,
            member_ids,
            created_at: now,
            updated_at: now,
            executed_at: None,
        }
    }

    pub fn is_member(&self, student_id: &str) -> bool {
        self.member_ids.iter().any(|id| id == student_id)
    }
}
