// ==========================================
// 学籍生命周期 - 配置层
// ==========================================
// 职责: 系统配置管理（出勤阈值、默认操作员、通知重试、学号编排）
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod lifecycle_config_trait;

// 重导出核心配置管理器
pub use config_manager::{config_keys, ConfigManager};
pub use lifecycle_config_trait::{LifecycleConfigReader, RollNumbering};
