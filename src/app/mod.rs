// ==========================================
// 学籍生命周期 - 应用层
// ==========================================
// 职责: 状态装配，把 JSON 命令分发到 API 并包装响应
// ==========================================

pub mod commands;
pub mod state;

// 重导出
pub use commands::{dispatch_command, ErrorResponse};
pub use state::{get_default_db_path, AppState};
