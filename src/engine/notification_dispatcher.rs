// ==========================================
// 学籍生命周期 - 通知出箱投递
// ==========================================
// 出箱行在业务事务内写入；此处在提交后逐条投递
// 失败累计次数，达到 notification_max_attempts 后 PARKED
// ==========================================

use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use crate::config::LifecycleConfigReader;
use crate::domain::notification::{NotificationKind, OutboxStatus};
use crate::engine::collaborators::NotificationService;
use crate::engine::error::{LifecycleError, LifecycleResult};
use crate::repository::NotificationOutboxRepository;

/// 单次投递统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub sent: usize,
    pub failed: usize,
    pub parked: usize,
}

pub struct NotificationDispatcher {
    outbox_repo: Arc<NotificationOutboxRepository>,
    notifier: Arc<dyn NotificationService>,
    config: Arc<dyn LifecycleConfigReader>,
}

impl NotificationDispatcher {
    pub fn new(
        outbox_repo: Arc<NotificationOutboxRepository>,
        notifier: Arc<dyn NotificationService>,
        config: Arc<dyn LifecycleConfigReader>,
    ) -> Self {
        Self {
            outbox_repo,
            notifier,
            config,
        }
    }

    /// 投递至多 `limit` 条待发通知
    #[instrument(skip(self))]
    pub fn dispatch_pending(&self, limit: usize) -> LifecycleResult<DispatchReport> {
        let max_attempts = self
            .config
            .get_notification_max_attempts()
            .map_err(|e| LifecycleError::Config(e.to_string()))?;

        let pending = self.outbox_repo.list_pending(limit)?;
        let mut report = DispatchReport::default();

        for message in pending {
            let contact = message.guardian_contact.as_deref();
            let result = match message.kind {
                NotificationKind::PromotionNotice => {
                    self.notifier
                        .send_promotion_notice(&message.student_id, contact, &message.payload_json)
                }
                NotificationKind::ArchiveConfirmation => {
                    self.notifier
                        .send_archive_confirmation(&message.student_id, contact, &message.payload_json)
                }
            };

            match result {
                Ok(()) => {
                    self.outbox_repo.mark_sent(&message.notification_id)?;
                    report.sent += 1;
                }
                Err(e) => {
                    let status = self.outbox_repo.record_failure(
                        &message.notification_id,
                        &e.to_string(),
                        max_attempts,
                    )?;
                    tracing::warn!(
                        notification_id = %message.notification_id,
                        student_id = %message.student_id,
                        status = status.as_str(),
                        error = %e,
                        "通知投递失败"
                    );
                    if status == OutboxStatus::Parked {
                        report.parked += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }

        if report != DispatchReport::default() {
            tracing::info!(sent = report.sent, failed = report.failed, parked = report.parked, "通知投递完成");
        }
        Ok(report)
    }
}
