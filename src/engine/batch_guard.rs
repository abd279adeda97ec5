// ==========================================
// 学籍生命周期 - 批次并发令牌校验
// ==========================================
// 所有修改批次的命令都先过这里:
// 1) 批次存在  2) 状态为 Draft/Confirmed  3) revision 与调用方一致
// 修改后统一 revision + 1；Confirmed 批次被修改后退回 Draft
// ==========================================

use rusqlite::Connection;

use crate::domain::batch::PromotionBatch;
use crate::domain::types::BatchStatus;
use crate::engine::error::{LifecycleError, LifecycleResult};
use crate::repository::PromotionBatchRepository;

/// 读取进行中的批次并校验并发令牌
pub(crate) fn load_open_batch_tx(
    conn: &Connection,
    batch_id: &str,
    expected_revision: i64,
) -> LifecycleResult<PromotionBatch> {
    let batch = PromotionBatchRepository::find_by_id_tx(conn, batch_id)?
        .ok_or_else(|| LifecycleError::not_found("PromotionBatch", batch_id))?;

    if !batch.status.is_open() {
        return Err(LifecycleError::invalid_state(
            batch_id,
            format!("批次状态为 {}，不可修改", batch.status),
        ));
    }
    check_revision(&batch, expected_revision)?;
    Ok(batch)
}

pub(crate) fn check_revision(batch: &PromotionBatch, expected_revision: i64) -> LifecycleResult<()> {
    if batch.revision != expected_revision {
        return Err(LifecycleError::conflict(
            &batch.batch_id,
            format!(
                "revision 已变化: expected={}, actual={}，请重新加载",
                expected_revision, batch.revision
            ),
        ));
    }
    Ok(())
}

/// 选择集合变化后推进 revision（Confirmed → Draft）
pub(crate) fn touch_batch_tx(conn: &Connection, batch: &mut PromotionBatch) -> LifecycleResult<i64> {
    if batch.status == BatchStatus::Confirmed {
        batch.status = BatchStatus::Draft;
        batch.confirmed_projection = None;
    }
    save_batch_tx(conn, batch)
}

/// 写回批次头并推进 revision
pub(crate) fn save_batch_tx(conn: &Connection, batch: &mut PromotionBatch) -> LifecycleResult<i64> {
    batch.updated_at = chrono::Local::now().naive_local();
    let new_revision = PromotionBatchRepository::update_tx(conn, batch)?;
    batch.revision = new_revision;
    Ok(new_revision)
}
