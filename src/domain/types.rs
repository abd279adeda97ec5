// ==========================================
// 学籍生命周期 - 领域类型定义
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;

// ==========================================
// 考试结果 (Exam Result)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExamResult {
    Pass,     // 通过
    Fail,     // 不及格
    Withheld, // 成绩暂扣
}

impl ExamResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExamResult::Pass => "PASS",
            ExamResult::Fail => "FAIL",
            ExamResult::Withheld => "WITHHELD",
        }
    }

    /// 宽松解析（大小写不敏感，兼容花名册导出的 Pass/Fail）
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "PASS" | "P" => Some(ExamResult::Pass),
            "FAIL" | "F" => Some(ExamResult::Fail),
            "WITHHELD" | "W" => Some(ExamResult::Withheld),
            _ => None,
        }
    }
}

impl fmt::Display for ExamResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 离校类型 (Exit Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitStatus {
    Graduated, // 毕业
    Withdrawn, // 退学
    Expelled,  // 开除
    Transfer,  // 转学
}

impl ExitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitStatus::Graduated => "GRADUATED",
            ExitStatus::Withdrawn => "WITHDRAWN",
            ExitStatus::Expelled => "EXPELLED",
            ExitStatus::Transfer => "TRANSFER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "GRADUATED" => Some(ExitStatus::Graduated),
            "WITHDRAWN" => Some(ExitStatus::Withdrawn),
            "EXPELLED" => Some(ExitStatus::Expelled),
            "TRANSFER" => Some(ExitStatus::Transfer),
            _ => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 升级批次状态 (Batch Status)
// ==========================================
// 状态机: Draft → Confirmed → Executed (终态)
//         Draft/Confirmed → Rejected (可重开为 Draft)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Draft,
    Confirmed,
    Executed,
    Rejected,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Draft => "DRAFT",
            BatchStatus::Confirmed => "CONFIRMED",
            BatchStatus::Executed => "EXECUTED",
            BatchStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "DRAFT" => Some(BatchStatus::Draft),
            "CONFIRMED" => Some(BatchStatus::Confirmed),
            "EXECUTED" => Some(BatchStatus::Executed),
            "REJECTED" => Some(BatchStatus::Rejected),
            _ => None,
        }
    }

    /// 批次是否仍持有学生（占用中）
    pub fn is_open(&self) -> bool {
        matches!(self, BatchStatus::Draft | BatchStatus::Confirmed)
    }

    /// 合法状态转换
    pub fn can_transition_to(&self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Draft, Confirmed)
                | (Confirmed, Draft)
                | (Confirmed, Executed)
                | (Draft, Rejected)
                | (Confirmed, Rejected)
                | (Rejected, Draft)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// Reason - 非空原因
// ==========================================
// 例外升级 / 恢复学籍必须提供原因；构造即校验，空白字符串无法构造
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Reason(String);

impl Reason {
    /// 去除首尾空白后非空才返回 Some
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Reason(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Reason {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Reason::new(&value).ok_or_else(|| "reason must not be blank".to_string())
    }
}

impl From<Reason> for String {
    fn from(r: Reason) -> Self {
        r.0
    }
}

impl fmt::Display for Reason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
