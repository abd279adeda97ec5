// ==========================================
// 学籍生命周期 - 升级资格判定
// ==========================================
// 规则 (按优先级):
// 1) 出勤率 < 门槛 → Retained（与成绩无关）
// 2) 考试 Fail / Withheld → Retained
// 3) 否则 → Eligible
// 红线: 无状态、无副作用、无 I/O 操作
// ==========================================

use serde::{Deserialize, Serialize};

use crate::config::LifecycleConfigReader;
use crate::domain::student::{LifecycleStatus, PerformanceInputs};
use crate::domain::types::ExamResult;
use crate::engine::error::{LifecycleError, LifecycleResult, ValidationFailure};

/// 默认判定结果（不含例外升级）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Eligibility {
    Eligible,
    Retained,
}

impl Eligibility {
    pub fn into_status(self) -> LifecycleStatus {
        match self {
            Eligibility::Eligible => LifecycleStatus::Eligible,
            Eligibility::Retained => LifecycleStatus::Retained,
        }
    }
}

// ==========================================
// EligibilityEvaluator - 资格判定器
// ==========================================
#[derive(Debug, Clone, Copy)]
pub struct EligibilityEvaluator {
    threshold_pct: f64,
}

impl Default for EligibilityEvaluator {
    fn default() -> Self {
        Self {
            threshold_pct: Self::DEFAULT_THRESHOLD_PCT,
        }
    }
}

impl EligibilityEvaluator {
    pub const DEFAULT_THRESHOLD_PCT: f64 = 75.0;

    pub fn new(threshold_pct: f64) -> Self {
        Self { threshold_pct }
    }

    /// 从配置读取出勤门槛
    pub fn from_config(config: &dyn LifecycleConfigReader) -> LifecycleResult<Self> {
        let threshold = config
            .get_attendance_threshold_pct()
            .map_err(|e| LifecycleError::Config(e.to_string()))?;
        Ok(Self::new(threshold))
    }

    pub fn threshold_pct(&self) -> f64 {
        self.threshold_pct
    }

    /// 判定默认状态
    ///
    /// # 返回
    /// - (Eligibility, Vec<String>): 判定结果和决策原因
    pub fn evaluate(&self, attendance_pct: f64, exam_result: ExamResult) -> (Eligibility, Vec<String>) {
        let mut reasons = Vec::new();

        if attendance_pct < self.threshold_pct {
            reasons.push(format!(
                "ATTENDANCE_BELOW_THRESHOLD: {:.1} < {:.1}",
                attendance_pct, self.threshold_pct
            ));
            return (Eligibility::Retained, reasons);
        }
        reasons.push(format!(
            "ATTENDANCE_OK: {:.1} >= {:.1}",
            attendance_pct, self.threshold_pct
        ));

        match exam_result {
            ExamResult::Fail | ExamResult::Withheld => {
                reasons.push(format!("EXAM_RESULT: {}", exam_result));
                (Eligibility::Retained, reasons)
            }
            ExamResult::Pass => {
                reasons.push("EXAM_RESULT: PASS".to_string());
                (Eligibility::Eligible, reasons)
            }
        }
    }

    /// 只取判定结果
    pub fn classify(&self, performance: &PerformanceInputs) -> Eligibility {
        self.evaluate(performance.attendance_pct, performance.exam_result).0
    }

    /// 入库前校验出勤率范围 0-100
    pub fn validate_attendance(student_id: &str, attendance_pct: f64) -> Result<(), ValidationFailure> {
        if !(0.0..=100.0).contains(&attendance_pct) || attendance_pct.is_nan() {
            return Err(ValidationFailure::AttendanceOutOfRange {
                student_id: student_id.to_string(),
                value: attendance_pct,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attendance_gates_before_result() {
        let ev = EligibilityEvaluator::default();
        let (status, reasons) = ev.evaluate(72.0, ExamResult::Pass);
        assert_eq!(status, Eligibility::Retained);
        assert!(reasons[0].starts_with("ATTENDANCE_BELOW_THRESHOLD"));
    }

    #[test]
    fn test_documented_cases() {
        let ev = EligibilityEvaluator::default();
        assert_eq!(ev.evaluate(92.0, ExamResult::Pass).0, Eligibility::Eligible);
        assert_eq!(ev.evaluate(80.0, ExamResult::Fail).0, Eligibility::Retained);
        assert_eq!(ev.evaluate(95.0, ExamResult::Withheld).0, Eligibility::Retained);
        // 门槛本身算达标
        assert_eq!(ev.evaluate(75.0, ExamResult::Pass).0, Eligibility::Eligible);
    }

    #[test]
    fn test_evaluation_is_deterministic() {
        let ev = EligibilityEvaluator::default();
        let first = ev.evaluate(65.0, ExamResult::Fail);
        let second = ev.evaluate(65.0, ExamResult::Fail);
        assert_eq!(first, second);
    }

    #[test]
    fn test_configured_threshold() {
        let ev = EligibilityEvaluator::new(90.0);
        assert_eq!(ev.evaluate(88.0, ExamResult::Pass).0, Eligibility::Retained);
    }

    #[test]
    fn test_attendance_range_validation() {
        assert!(EligibilityEvaluator::validate_attendance("S1", 100.0).is_ok());
        assert!(EligibilityEvaluator::validate_attendance("S1", -1.0).is_err());
        assert!(EligibilityEvaluator::validate_attendance("S1", 100.5).is_err());
    }
}
