// ==========================================
// 学籍生命周期 - 班级容量
// ==========================================
// 外部容量服务提供，核心只读
// ==========================================

use serde::{Deserialize, Serialize};

// ==========================================
// SeatLimit - 座位上限（校友/离校目标不限）
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "seats", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SeatLimit {
    Limited(u32),
    Unlimited,
}

impl SeatLimit {
    /// 数据库存储: NULL = 不限
    pub fn from_db(capacity: Option<i64>) -> Self {
        match capacity {
            Some(c) if c >= 0 => SeatLimit::Limited(c as u32),
            Some(_) => SeatLimit::Limited(0),
            None => SeatLimit::Unlimited,
        }
    }

    pub fn to_db(&self) -> Option<i64> {
        match self {
            SeatLimit::Limited(c) => Some(*c as i64),
            SeatLimit::Unlimited => None,
        }
    }
}

// ==========================================
// ClassCapacity - 班级容量快照
// ==========================================
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCapacity {
    pub class_id: String,
    pub academic_year: String,
    pub seat_limit: SeatLimit,
    pub current_enrolled: u32,
}

impl ClassCapacity {
    /// 剩余座位（不限时为 None）
    pub fn remaining_seats(&self) -> Option<u32> {
        match self.seat_limit {
            SeatLimit::Limited(c) => Some(c.saturating_sub(self.current_enrolled)),
            SeatLimit::Unlimited => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seat_limit_db_mapping() {
        assert_eq!(SeatLimit::from_db(None), SeatLimit::Unlimited);
        assert_eq!(SeatLimit::from_db(Some(35)), SeatLimit::Limited(35));
        assert_eq!(SeatLimit::Limited(35).to_db(), Some(35));
        assert_eq!(SeatLimit::Unlimited.to_db(), None);
    }

    #[test]
    fn test_remaining_seats() {
        let cap = ClassCapacity {
            class_id: "G6".to_string(),
            academic_year: "2026-2027".to_string(),
            seat_limit: SeatLimit::Limited(35),
            current_enrolled: 12,
        };
        assert_eq!(cap.remaining_seats(), Some(23));
    }
}
