// ==========================================
// 测试辅助函数
// ==========================================
// 职责: 临时数据库、演示班级、可注入失败的协作方
// ==========================================

#![allow(dead_code)]

use std::error::Error;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde_json::Value as JsonValue;
use tempfile::NamedTempFile;

use student_lifecycle::api::LifecycleApi;
use student_lifecycle::config::ConfigManager;
use student_lifecycle::domain::{ClassCapacity, CohortMember, PerformanceInputs, Placement, SeatLimit};
use student_lifecycle::engine::{
    CollaboratorResult, Collaborators, FeeService, LifecycleRepositories,
    LoggingNotificationService, NotificationService,
};
use student_lifecycle::repository::{FeeLedgerRepository, RosterDirectoryRepository};
use student_lifecycle::ExamResult;

pub const SOURCE_CLASS: &str = "G5";
pub const SOURCE_YEAR: &str = "2025-2026";
pub const TARGET_CLASS: &str = "G6";
pub const TARGET_YEAR: &str = "2026-2027";
pub const OPERATOR: &str = "registrar";

/// 创建临时测试数据库并初始化 schema
///
/// # 返回
/// - NamedTempFile: 临时数据库文件（需要保持存活）
/// - String: 数据库文件路径
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是 UTF-8")?
        .to_string();

    let conn = student_lifecycle::db::open_sqlite_connection(&db_path)?;
    student_lifecycle::db::init_schema(&conn)?;

    Ok((temp_file, db_path))
}

// ==========================================
// 测试环境
// ==========================================

pub struct TestEnv {
    pub _temp_file: NamedTempFile,
    pub db_path: String,
    pub conn: Arc<Mutex<Connection>>,
    pub api: LifecycleApi,
    pub repos: LifecycleRepositories,
    pub directory: Arc<RosterDirectoryRepository>,
    pub fees: Arc<FeeLedgerRepository>,
    pub config: Arc<ConfigManager>,
}

/// 内置协作方 + 日志通知
pub fn setup_env() -> TestEnv {
    setup_env_with(None, None)
}

/// 可替换收费服务 / 通知服务
pub fn setup_env_with(
    fees: Option<Arc<dyn FeeService>>,
    notifier: Option<Arc<dyn NotificationService>>,
) -> TestEnv {
    student_lifecycle::logging::init_test();
    let (temp_file, db_path) = create_test_db().unwrap();
    let conn = Arc::new(Mutex::new(
        student_lifecycle::db::open_sqlite_connection(&db_path).unwrap(),
    ));

    let directory = Arc::new(RosterDirectoryRepository::new(conn.clone()));
    let ledger = Arc::new(FeeLedgerRepository::new(conn.clone()));
    let collaborators = Collaborators {
        roster: directory.clone(),
        capacity: directory.clone(),
        fees: fees.unwrap_or_else(|| ledger.clone() as Arc<dyn FeeService>),
        notifier: notifier
            .unwrap_or_else(|| Arc::new(LoggingNotificationService) as Arc<dyn NotificationService>),
    };
    let config = Arc::new(ConfigManager::from_connection(conn.clone()).unwrap());
    let api = LifecycleApi::new(conn.clone(), collaborators, config.clone());

    TestEnv {
        _temp_file: temp_file,
        db_path,
        repos: LifecycleRepositories::new(conn.clone()),
        conn,
        api,
        directory,
        fees: ledger,
        config,
    }
}

// ==========================================
// 演示班级（7 人）
// ==========================================

pub fn member(id: &str, roll: u32, attendance: f64, result: ExamResult) -> CohortMember {
    member_in(SOURCE_CLASS, id, roll, attendance, result)
}

/// 源学年内任意班级的学生
pub fn member_in(class_id: &str, id: &str, roll: u32, attendance: f64, result: ExamResult) -> CohortMember {
    CohortMember {
        student_id: id.to_string(),
        name: format!("Student {}", id),
        placement: Placement::new(class_id, "A", roll),
        academic_year: SOURCE_YEAR.to_string(),
        performance: PerformanceInputs {
            attendance_pct: attendance,
            academic_score: 70.0,
            exam_result: result,
        },
        guardian_contact: Some(format!("guardian-{}@example.org", id.to_lowercase())),
    }
}

/// S1..S7: 默认判定选中 {S1,S2,S4,S7}，留级 {S3,S5,S6}
pub fn demo_cohort() -> Vec<CohortMember> {
    vec![
        member("S1", 1, 92.0, ExamResult::Pass),
        member("S2", 2, 88.0, ExamResult::Pass),
        member("S3", 3, 65.0, ExamResult::Fail),
        member("S4", 4, 95.0, ExamResult::Pass),
        member("S5", 5, 72.0, ExamResult::Pass),
        member("S6", 6, 80.0, ExamResult::Fail),
        member("S7", 7, 85.0, ExamResult::Pass),
    ]
}

pub fn set_capacity(directory: &RosterDirectoryRepository, class_id: &str, year: &str, seats: u32, enrolled: u32) {
    directory
        .set_capacity(&ClassCapacity {
            class_id: class_id.to_string(),
            academic_year: year.to_string(),
            seat_limit: SeatLimit::Limited(seats),
            current_enrolled: enrolled,
        })
        .unwrap();
}

/// 写入演示花名册；源班级 40 座 / 在读 7，目标班级 35 座 / 在读 12
pub fn seed_demo_cohort(env: &TestEnv) {
    let members = demo_cohort();
    env.directory.upsert_members(&members).unwrap();
    set_capacity(&env.directory, SOURCE_CLASS, SOURCE_YEAR, 40, members.len() as u32);
    set_capacity(&env.directory, TARGET_CLASS, TARGET_YEAR, 35, 12);
}

/// 建批并设置目标，返回 (batch_id, revision)
pub fn draft_batch_with_target(env: &TestEnv) -> (String, i64) {
    let view = env.api.select_cohort(SOURCE_CLASS, SOURCE_YEAR, Some(OPERATOR)).unwrap();
    let view = env
        .api
        .set_target(&view.batch.batch_id, view.batch.revision, TARGET_CLASS, TARGET_YEAR, Some(OPERATOR))
        .unwrap();
    (view.batch.batch_id, view.batch.revision)
}

// ==========================================
// 可注入失败的协作方
// ==========================================

/// 对指定学生分配收费时失败，其余委托给内置台账
pub struct FailingFeeService {
    pub inner: Arc<FeeLedgerRepository>,
    pub fail_for: String,
}

impl FeeService for FailingFeeService {
    fn assign_fee_structure(&self, student_id: &str, academic_year: &str) -> CollaboratorResult<String> {
        if student_id == self.fail_for {
            return Err(format!("fee gateway rejected {}", student_id).into());
        }
        Ok(self.inner.assign(student_id, academic_year)?)
    }

    fn revoke_fee_structure(&self, assignment_id: &str) -> CollaboratorResult<()> {
        Ok(self.inner.revoke(assignment_id)?)
    }
}

/// 记录投递内容；前 `fail_first` 次调用失败
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(String, String)>>,
    pub fail_first: AtomicU32,
}

impl RecordingNotifier {
    pub fn failing(times: u32) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail_first: AtomicU32::new(times),
        }
    }

    fn deliver(&self, kind: &str, student_id: &str) -> CollaboratorResult<()> {
        let remaining = self.fail_first.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_first.store(remaining - 1, Ordering::SeqCst);
            return Err("gateway unavailable".into());
        }
        self.sent
            .lock()
            .unwrap()
            .push((kind.to_string(), student_id.to_string()));
        Ok(())
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }
}

impl NotificationService for RecordingNotifier {
    fn send_promotion_notice(
        &self,
        student_id: &str,
        _guardian_contact: Option<&str>,
        _payload: &JsonValue,
    ) -> CollaboratorResult<()> {
        self.deliver("promotion", student_id)
    }

    fn send_archive_confirmation(
        &self,
        student_id: &str,
        _guardian_contact: Option<&str>,
        _payload: &JsonValue,
    ) -> CollaboratorResult<()> {
        self.deliver("archive", student_id)
    }
}
