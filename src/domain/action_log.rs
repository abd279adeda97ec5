// ==========================================
// 学籍生命周期 - 操作日志领域模型
// ==========================================
// 红线: 所有写入必须记录；日志只追加，不修改、不删除
// 对齐: action_log 表
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

// ==========================================
// ActionLog - 操作日志
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionLog {
    pub action_id: String,
    pub action_type: String,      // 操作类型 (存储为字符串)
    pub action_ts: NaiveDateTime,
    pub actor: String,
    pub entity_id: String,        // 学生ID / 批次ID

    pub reason: Option<String>,
    pub batch_id: Option<String>,

    // ===== 操作负载 =====
    pub payload_json: Option<JsonValue>,
    pub detail: Option<String>,
}

// ==========================================
// ActionType - 操作类型
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionType {
    OverridePromotion,  // 例外升级
    OverrideRevoked,    // 撤销例外升级（记录保留）
    BatchCreated,       // 选定源班级，创建批次
    BatchTargetSet,     // 设置目标班级/学年
    SelectionChanged,   // 勾选/取消勾选
    PlacementProposed,  // 人工指定目标分班/学号
    CohortRefreshed,    // 重新读取花名册并判定
    BatchConfirmed,     // 确认批次
    PromotionExecuted,  // 单个学生升级完成
    BatchExecuted,      // 批次执行完成
    PromotionAborted,   // 执行前容量复核失败，退回 Draft
    BatchRejected,      // 驳回批次
    BatchReopened,      // 驳回后重开
    StudentArchived,    // 归档
    StudentReactivated, // 恢复学籍
}

impl ActionType {
    /// 转换为字符串 (用于数据库存储)
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::OverridePromotion => "override-promotion",
            ActionType::OverrideRevoked => "override-revoked",
            ActionType::BatchCreated => "batch-created",
            ActionType::BatchTargetSet => "batch-target-set",
            ActionType::SelectionChanged => "selection-changed",
            ActionType::PlacementProposed => "placement-proposed",
            ActionType::CohortRefreshed => "cohort-refreshed",
            ActionType::BatchConfirmed => "batch-confirmed",
            ActionType::PromotionExecuted => "promotion-executed",
            ActionType::BatchExecuted => "batch-executed",
            ActionType::PromotionAborted => "promotion-aborted",
            ActionType::BatchRejected => "batch-rejected",
            ActionType::BatchReopened => "batch-reopened",
            ActionType::StudentArchived => "student-archived",
            ActionType::StudentReactivated => "student-reactivated",
        }
    }

    /// 从字符串解析
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "override-promotion" => Some(ActionType::OverridePromotion),
            "override-revoked" => Some(ActionType::OverrideRevoked),
            "batch-created" => Some(ActionType::BatchCreated),
            "batch-target-set" => Some(ActionType::BatchTargetSet),
            "selection-changed" => Some(ActionType::SelectionChanged),
            "placement-proposed" => Some(ActionType::PlacementProposed),
            "cohort-refreshed" => Some(ActionType::CohortRefreshed),
            "batch-confirmed" => Some(ActionType::BatchConfirmed),
            "promotion-executed" => Some(ActionType::PromotionExecuted),
            "batch-executed" => Some(ActionType::BatchExecuted),
            "promotion-aborted" => Some(ActionType::PromotionAborted),
            "batch-rejected" => Some(ActionType::BatchRejected),
            "batch-reopened" => Some(ActionType::BatchReopened),
            "student-archived" => Some(ActionType::StudentArchived),
            "student-reactivated" => Some(ActionType::StudentReactivated),
            _ => None,
        }
    }
}

// ==========================================
// ActionLog 辅助方法
// ==========================================
impl ActionLog {
    /// 创建新的操作日志
    ///
    /// # 参数
    /// - `action_type`: 操作类型
    /// - `actor`: 操作人
    /// - `entity_id`: 受影响实体 (学生ID 或批次ID)
    pub fn new(action_type: ActionType, actor: &str, entity_id: &str) -> Self {
        Self {
            action_id: uuid::Uuid::new_v4().to_string(),
            action_type: action_type.as_str().to_string(),
            action_ts: chrono::Local::now().naive_local(),
            actor: actor.to_string(),
            entity_id: entity_id.to_string(),
            reason: None,
            batch_id: None,
            payload_json: None,
            detail: None,
        }
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_batch(mut self, batch_id: &str) -> Self {
        self.batch_id = Some(batch_id.to_string());
        self
    }

    /// 设置操作负载 (转换为JSON)
    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Self {
        self.payload_json = serde_json::to_value(payload).ok();
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn kind(&self) -> Option<ActionType> {
        ActionType::parse(&self.action_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_type_round_trip_names() {
        for t in [
            ActionType::OverridePromotion,
            ActionType::BatchExecuted,
            ActionType::StudentReactivated,
        ] {
            assert_eq!(ActionType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ActionType::parse("Import"), None);
    }

    #[test]
    fn test_builder_sets_optional_fields() {
        let log = ActionLog::new(ActionType::OverridePromotion, "principal", "S5")
            .with_reason("Medical exemption")
            .with_batch("B1")
            .with_payload(&serde_json::json!({ "override_id": "O1" }));
        assert_eq!(log.kind(), Some(ActionType::OverridePromotion));
        assert_eq!(log.reason.as_deref(), Some("Medical exemption"));
        assert_eq!(log.batch_id.as_deref(), Some("B1"));
        assert!(log.payload_json.is_some());
    }
}
