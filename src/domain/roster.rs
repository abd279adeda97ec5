// ==========================================
// 学籍生命周期 - 花名册条目
// ==========================================
// 花名册服务 listCohort 的返回行；CSV 导入同样产出该结构
// ==========================================

use serde::{Deserialize, Serialize};

use crate::domain::student::{PerformanceInputs, Placement};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortMember {
    pub student_id: String,
    pub name: String,
    pub placement: Placement,
    pub academic_year: String,
    pub performance: PerformanceInputs,
    pub guardian_contact: Option<String>,
}
