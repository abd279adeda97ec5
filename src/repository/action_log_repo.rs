// ==========================================
// 学籍生命周期 - 操作日志数据仓储（审计落地）
// ==========================================
// 红线: 所有写入必须记录
// 红线: 只追加；表上触发器拒绝 UPDATE/DELETE
// ==========================================

mod core;
mod queries;


pub use core::ActionLogRepository;
