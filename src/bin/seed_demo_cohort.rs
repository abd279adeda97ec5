// ==========================================
// 演示数据: 7 名学生的五年级花名册
// ==========================================
// 用法: seed_demo_cohort [db_path]
// 已有数据库会先备份再重建
// ==========================================

use chrono::Local;
use std::error::Error;
use std::fs;
use std::path::Path;

use student_lifecycle::app::{get_default_db_path, AppState};
use student_lifecycle::domain::{ClassCapacity, CohortMember, PerformanceInputs, Placement, SeatLimit};
use student_lifecycle::repository::RosterDirectoryRepository;
use student_lifecycle::ExamResult;

const SOURCE_CLASS: &str = "G5";
const SOURCE_YEAR: &str = "2025-2026";
const TARGET_CLASS: &str = "G6";
const TARGET_YEAR: &str = "2026-2027";

// (学号, 姓名, 出勤率, 成绩, 考试结果)
const DEMO_COHORT: [(&str, &str, f64, f64, ExamResult); 7] = [
    ("S1", "Asha Rao", 92.0, 81.0, ExamResult::Pass),
    ("S2", "Bilal Khan", 88.0, 74.0, ExamResult::Pass),
    ("S3", "Chen Wei", 65.0, 38.0, ExamResult::Fail),
    ("S4", "Dana Ortiz", 95.0, 90.0, ExamResult::Pass),
    ("S5", "Emeka Obi", 72.0, 69.0, ExamResult::Pass),
    ("S6", "Farah Aziz", 80.0, 41.0, ExamResult::Fail),
    ("S7", "Goran Ilic", 85.0, 77.0, ExamResult::Pass),
];

fn main() -> Result<(), Box<dyn Error>> {
    student_lifecycle::logging::init();

    let db_path = std::env::args().nth(1).unwrap_or_else(get_default_db_path);
    backup_and_reset_db(&db_path)?;

    let state = AppState::new(db_path.clone())?;
    let directory = RosterDirectoryRepository::new(state.connection());

    let members: Vec<CohortMember> = DEMO_COHORT
        .iter()
        .enumerate()
        .map(|(i, (id, name, attendance, score, result))| CohortMember {
            student_id: id.to_string(),
            name: name.to_string(),
            placement: Placement::new(SOURCE_CLASS, "A", i as u32 + 1),
            academic_year: SOURCE_YEAR.to_string(),
            performance: PerformanceInputs {
                attendance_pct: *attendance,
                academic_score: *score,
                exam_result: *result,
            },
            guardian_contact: Some(format!("guardian-{}@example.org", id.to_lowercase())),
        })
        .collect();
    directory.upsert_members(&members)?;

    directory.set_capacity(&ClassCapacity {
        class_id: SOURCE_CLASS.to_string(),
        academic_year: SOURCE_YEAR.to_string(),
        seat_limit: SeatLimit::Limited(40),
        current_enrolled: members.len() as u32,
    })?;
    directory.set_capacity(&ClassCapacity {
        class_id: TARGET_CLASS.to_string(),
        academic_year: TARGET_YEAR.to_string(),
        seat_limit: SeatLimit::Limited(35),
        current_enrolled: 12,
    })?;

    println!("数据库: {}", db_path);
    println!(
        "花名册: {} {} 共 {} 人; 目标 {} {} 容量 35 / 在读 12",
        SOURCE_CLASS,
        SOURCE_YEAR,
        members.len(),
        TARGET_CLASS,
        TARGET_YEAR
    );
    Ok(())
}

fn backup_and_reset_db(db_path: &str) -> Result<(), Box<dyn Error>> {
    let path = Path::new(db_path);
    if !path.exists() {
        return Ok(());
    }

    let ts = Local::now().format("%Y%m%d_%H%M%S").to_string();
    let backup_path = format!("{}.bak.{}", db_path, ts);
    fs::copy(path, &backup_path)?;
    fs::remove_file(path)?;

    eprintln!("Backed up {} -> {}", db_path, backup_path);
    Ok(())
}
