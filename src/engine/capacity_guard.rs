// ==========================================
// 学籍生命周期 - 容量闸门
// ==========================================
// projected = current_enrolled + selected_count
// 不限座位 或 projected <= capacity → 通过
// 用法: confirm 时提示性检查；execute 前以最新容量快照权威复核
// ==========================================

use serde::{Deserialize, Serialize};

use crate::domain::capacity::{ClassCapacity, SeatLimit};
use crate::engine::error::{LifecycleError, LifecycleResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CapacityVerdict {
    Ok { projected: u32 },
    Exceeded { projected: u32, capacity: u32 },
}

pub struct CapacityGuard;

impl CapacityGuard {
    pub fn check_capacity(
        target_class: &str,
        current_enrolled: u32,
        seat_limit: SeatLimit,
        selected_count: u32,
    ) -> CapacityVerdict {
        let projected = current_enrolled.saturating_add(selected_count);
        let verdict = match seat_limit {
            SeatLimit::Unlimited => CapacityVerdict::Ok { projected },
            SeatLimit::Limited(capacity) if projected <= capacity => CapacityVerdict::Ok { projected },
            SeatLimit::Limited(capacity) => CapacityVerdict::Exceeded { projected, capacity },
        };
        tracing::debug!(target_class, current_enrolled, selected_count, ?verdict, "容量检查");
        verdict
    }

    /// 容量快照版本
    pub fn check_snapshot(capacity: &ClassCapacity, selected_count: u32) -> CapacityVerdict {
        Self::check_capacity(
            &capacity.class_id,
            capacity.current_enrolled,
            capacity.seat_limit,
            selected_count,
        )
    }

    /// 不通过即返回 CapacityExceeded；通过返回 projected
    pub fn enforce(capacity: &ClassCapacity, selected_count: u32) -> LifecycleResult<u32> {
        match Self::check_snapshot(capacity, selected_count) {
            CapacityVerdict::Ok { projected } => Ok(projected),
            CapacityVerdict::Exceeded { projected, capacity: seats } => Err(LifecycleError::CapacityExceeded {
                class_id: capacity.class_id.clone(),
                projected,
                capacity: seats,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_capacity() {
        assert_eq!(
            CapacityGuard::check_capacity("G6", 12, SeatLimit::Limited(35), 4),
            CapacityVerdict::Ok { projected: 16 }
        );
        assert_eq!(
            CapacityGuard::check_capacity("G6", 12, SeatLimit::Limited(35), 23),
            CapacityVerdict::Ok { projected: 35 }
        );
    }

    #[test]
    fn test_exceeded_reports_projection() {
        assert_eq!(
            CapacityGuard::check_capacity("G6", 12, SeatLimit::Limited(35), 24),
            CapacityVerdict::Exceeded { projected: 36, capacity: 35 }
        );
    }

    #[test]
    fn test_unlimited_is_waived() {
        assert_eq!(
            CapacityGuard::check_capacity("ALUMNI", 5_000, SeatLimit::Unlimited, 400),
            CapacityVerdict::Ok { projected: 5_400 }
        );
    }

    #[test]
    fn test_enforce_maps_to_error() {
        let cap = ClassCapacity {
            class_id: "G6".to_string(),
            academic_year: "2026-2027".to_string(),
            seat_limit: SeatLimit::Limited(10),
            current_enrolled: 9,
        };
        assert_eq!(CapacityGuard::enforce(&cap, 1).unwrap(), 10);
        assert!(matches!(
            CapacityGuard::enforce(&cap, 2),
            Err(LifecycleError::CapacityExceeded { projected: 11, capacity: 10, .. })
        ));
    }
}
