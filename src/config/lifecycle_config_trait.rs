// ==========================================
// 学籍生命周期 - 配置读取 Trait
// ==========================================
// 职责: 定义引擎所需的配置读取接口（不包含实现）
// 红线: 不包含配置写入、不包含业务逻辑
// ==========================================

use serde::{Deserialize, Serialize};
use std::error::Error;

// ==========================================
// RollNumbering - 升级后学号编排方式
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RollNumbering {
    Append,   // 接在目标班级现有人数之后
    Preserve, // 沿用原学号
}

impl RollNumbering {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "APPEND" => Some(RollNumbering::Append),
            "PRESERVE" => Some(RollNumbering::Preserve),
            _ => None,
        }
    }
}

// ==========================================
// LifecycleConfigReader Trait
// ==========================================
// 实现者: ConfigManager（从 config_kv 表读取）
pub trait LifecycleConfigReader: Send + Sync {
    /// 出勤率门槛（低于即留级）
    ///
    /// # 默认值
    /// - 75.0
    fn get_attendance_threshold_pct(&self) -> Result<f64, Box<dyn Error>>;

    /// 未指定操作员时写入审计的默认值
    ///
    /// # 默认值
    /// - "system"
    fn get_default_operator(&self) -> Result<String, Box<dyn Error>>;

    /// 通知最大投递次数，超过后 PARKED
    ///
    /// # 默认值
    /// - 3
    fn get_notification_max_attempts(&self) -> Result<u32, Box<dyn Error>>;

    /// 学号编排方式
    ///
    /// # 默认值
    /// - APPEND
    fn get_roll_numbering(&self) -> Result<RollNumbering, Box<dyn Error>>;

    /// 全部全局配置（JSON，含默认值），写入批次执行审计
    fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>>;
}
