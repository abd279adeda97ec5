// ==========================================
// 学籍生命周期 - 通知发件箱
// ==========================================
// 通知在提交事务内入队，提交后由 NotificationDispatcher 投递
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    PromotionNotice,     // 升级通知
    ArchiveConfirmation, // 归档确认
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::PromotionNotice => "PROMOTION_NOTICE",
            NotificationKind::ArchiveConfirmation => "ARCHIVE_CONFIRMATION",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PROMOTION_NOTICE" => Some(NotificationKind::PromotionNotice),
            "ARCHIVE_CONFIRMATION" => Some(NotificationKind::ArchiveConfirmation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Sent,
    Parked, // 超过最大重试次数，等待人工处理
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Parked => "PARKED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(OutboxStatus::Pending),
            "SENT" => Some(OutboxStatus::Sent),
            "PARKED" => Some(OutboxStatus::Parked),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub notification_id: String,
    pub kind: NotificationKind,
    pub student_id: String,
    pub guardian_contact: Option<String>,
    pub payload_json: JsonValue,
    pub status: OutboxStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: NaiveDateTime,
    pub sent_at: Option<NaiveDateTime>,
}

impl OutboxMessage {
    pub fn pending(
        kind: NotificationKind,
        student_id: &str,
        guardian_contact: Option<String>,
        payload_json: JsonValue,
    ) -> Self {
        Self {
            notification_id: uuid::Uuid::new_v4().to_string(),
            kind,
            student_id: student_id.to_string(),
            guardian_contact,
            payload_json,
            status: OutboxStatus::Pending,
            attempts: 0,
            last_error: None,
            created_at: chrono::Local::now().naive_local(),
            sent_at: None,
        }
    }
}
