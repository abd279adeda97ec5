// ==========================================
// 学籍生命周期 - 例外升级记录
// ==========================================
// 红线: 仅由 OverrideManager 创建; 写入后不可修改、不可删除
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::domain::student::OverrideGrant;
use crate::domain::types::Reason;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideRecord {
    pub override_id: String,
    pub student_id: String,
    pub batch_id: Option<String>,
    pub reason: Reason,
    pub approved_by: String,
    pub created_at: NaiveDateTime,
}

impl OverrideRecord {
    pub fn new(student_id: &str, batch_id: Option<String>, reason: Reason, approved_by: &str) -> Self {
        Self {
            override_id: uuid::Uuid::new_v4().to_string(),
            student_id: student_id.to_string(),
            batch_id,
            reason,
            approved_by: approved_by.to_string(),
            created_at: chrono::Local::now().naive_local(),
        }
    }

    /// 生成挂在 Conditional 状态上的授权
    pub fn grant(&self) -> OverrideGrant {
        OverrideGrant {
            override_id: self.override_id.clone(),
            reason: self.reason.clone(),
            approved_by: self.approved_by.clone(),
        }
    }
}
