// ==========================================
// 学籍生命周期 - 升级批次执行器
// ==========================================
// 状态机: Draft → Confirmed → Executed (终态)
//         Draft/Confirmed → Rejected → (reopen) Draft
// 红线: 执行全有或全无；失败时批次保持 Confirmed，可整体重试
// 红线: 协作方调用不持有数据库锁
// ==========================================

mod core;
mod execution;
mod review;
mod selection;

pub use core::{BatchView, ExecutionReport, PromotionBatchExecutor};
