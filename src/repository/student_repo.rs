// ==========================================
// 学籍生命周期 - 学生生命周期记录仓储
// ==========================================
// 红线: Repository 不含业务逻辑
// 红线: Conditional 状态从 override_record 关联还原授权
// ==========================================

use crate::domain::student::{
    LifecycleStatus, OverrideGrant, PerformanceInputs, Placement, StudentLifecycleRecord,
};
use crate::domain::types::{ExamResult, Reason};
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{conversion_err, fmt_ts, parse_enum, parse_ts};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

const SELECT_COLUMNS: &str = r#"
    SELECT s.student_id, s.name, s.class_id, s.section, s.roll, s.academic_year,
           s.attendance_pct, s.academic_score, s.exam_result, s.status,
           s.override_id, s.archive_id, s.proposed_class, s.proposed_section, s.proposed_roll,
           s.selected_for_batch, s.batch_id, s.guardian_contact, s.restored_from_archive_id,
           s.updated_at, o.reason, o.approved_by
    FROM student_lifecycle s
    LEFT JOIN override_record o ON o.override_id = s.override_id
"#;

// ==========================================
// StudentLifecycleRepository - 学生记录仓储
// ==========================================
pub struct StudentLifecycleRepository {
    conn: Arc<Mutex<Connection>>,
}

impl StudentLifecycleRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 获取数据库连接
    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 查询操作
    // ==========================================

    pub fn find_by_id(&self, student_id: &str) -> RepositoryResult<Option<StudentLifecycleRecord>> {
        let conn = self.get_conn()?;
        Self::find_by_id_tx(&conn, student_id)
    }

    /// 批次候选（按入批顺序）
    pub fn find_by_batch(&self, batch_id: &str) -> RepositoryResult<Vec<StudentLifecycleRecord>> {
        let conn = self.get_conn()?;
        Self::find_by_batch_tx(&conn, batch_id)
    }

    /// 在读（未归档）的班级/学年学生
    pub fn find_active_by_cohort(
        &self,
        class_id: &str,
        academic_year: &str,
    ) -> RepositoryResult<Vec<StudentLifecycleRecord>> {
        let conn = self.get_conn()?;
        Self::find_active_by_cohort_tx(&conn, class_id, academic_year)
    }

    pub fn count_by_status(&self, status: &str) -> RepositoryResult<i64> {
        let conn = self.get_conn()?;
        let n = conn.query_row(
            "SELECT COUNT(*) FROM student_lifecycle WHERE status = ?",
            params![status],
            |row| row.get(0),
        )?;
        Ok(n)
    }

    // ==========================================
    // 事务内操作（由引擎组合）
    // ==========================================

    pub fn find_by_id_tx(
        conn: &Connection,
        student_id: &str,
    ) -> RepositoryResult<Option<StudentLifecycleRecord>> {
        let sql = format!("{} WHERE s.student_id = ?", SELECT_COLUMNS);
        let record = conn
            .query_row(&sql, params![student_id], map_row)
            .optional()?;
        Ok(record)
    }

    pub fn find_by_batch_tx(
        conn: &Connection,
        batch_id: &str,
    ) -> RepositoryResult<Vec<StudentLifecycleRecord>> {
        let sql = format!(
            "{} JOIN promotion_batch_member m ON m.student_id = s.student_id
             WHERE m.batch_id = ? ORDER BY m.seq_no",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![batch_id], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    pub fn find_active_by_cohort_tx(
        conn: &Connection,
        class_id: &str,
        academic_year: &str,
    ) -> RepositoryResult<Vec<StudentLifecycleRecord>> {
        let sql = format!(
            "{} WHERE s.class_id = ? AND s.academic_year = ? AND s.status <> 'ARCHIVED'
             ORDER BY s.roll, s.student_id",
            SELECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![class_id, academic_year], map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// 整行写入（新增或覆盖）
    pub fn save_tx(conn: &Connection, record: &StudentLifecycleRecord) -> RepositoryResult<()> {
        let (override_id, archive_id) = match &record.status {
            LifecycleStatus::Conditional { grant } => (Some(grant.override_id.as_str()), None),
            LifecycleStatus::Archived { archive_id } => (None, Some(archive_id.as_str())),
            _ => (None, None),
        };
        let placement = record.placement.as_ref();
        let proposed = record.proposed.as_ref();

        conn.execute(
            r#"
            INSERT INTO student_lifecycle (
                student_id, name, class_id, section, roll, academic_year,
                attendance_pct, academic_score, exam_result, status,
                override_id, archive_id, proposed_class, proposed_section, proposed_roll,
                selected_for_batch, batch_id, guardian_contact, restored_from_archive_id, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)
            ON CONFLICT(student_id) DO UPDATE SET
                name = excluded.name,
                class_id = excluded.class_id,
                section = excluded.section,
                roll = excluded.roll,
                academic_year = excluded.academic_year,
                attendance_pct = excluded.attendance_pct,
                academic_score = excluded.academic_score,
                exam_result = excluded.exam_result,
                status = excluded.status,
                override_id = excluded.override_id,
                archive_id = excluded.archive_id,
                proposed_class = excluded.proposed_class,
                proposed_section = excluded.proposed_section,
                proposed_roll = excluded.proposed_roll,
                selected_for_batch = excluded.selected_for_batch,
                batch_id = excluded.batch_id,
                guardian_contact = excluded.guardian_contact,
                restored_from_archive_id = excluded.restored_from_archive_id,
                updated_at = excluded.updated_at
            "#,
            params![
                record.student_id,
                record.name,
                placement.map(|p| p.class_id.as_str()),
                placement.map(|p| p.section.as_str()),
                placement.map(|p| p.roll as i64),
                record.academic_year,
                record.performance.attendance_pct,
                record.performance.academic_score,
                record.performance.exam_result.as_str(),
                record.status.as_str(),
                override_id,
                archive_id,
                proposed.map(|p| p.class_id.as_str()),
                proposed.map(|p| p.section.as_str()),
                proposed.map(|p| p.roll as i64),
                record.is_selected() as i64,
                record.batch_id,
                record.guardian_contact,
                record.restored_from_archive_id,
                fmt_ts(&record.updated_at),
            ],
        )?;
        Ok(())
    }
}

fn placement_from(class_id: Option<String>, section: Option<String>, roll: Option<i64>) -> Option<Placement> {
    match (class_id, section, roll) {
        (Some(class_id), Some(section), Some(roll)) => Some(Placement {
            class_id,
            section,
            roll: roll.max(0) as u32,
        }),
        _ => None,
    }
}

fn map_row(row: &Row) -> rusqlite::Result<StudentLifecycleRecord> {
    let student_id: String = row.get(0)?;
    let exam_raw: String = row.get(8)?;
    let status_raw: String = row.get(9)?;
    let override_id: Option<String> = row.get(10)?;
    let archive_id: Option<String> = row.get(11)?;

    let status = match status_raw.as_str() {
        "ELIGIBLE" => LifecycleStatus::Eligible,
        "RETAINED" => LifecycleStatus::Retained,
        "CONDITIONAL" => {
            let override_id =
                override_id.ok_or_else(|| conversion_err(10, "CONDITIONAL without override_id".to_string()))?;
            let reason_raw: Option<String> = row.get(20)?;
            let reason = reason_raw
                .as_deref()
                .and_then(Reason::new)
                .ok_or_else(|| conversion_err(20, format!("override {} has no reason", override_id)))?;
            let approved_by: Option<String> = row.get(21)?;
            LifecycleStatus::Conditional {
                grant: OverrideGrant {
                    override_id,
                    reason,
                    approved_by: approved_by.unwrap_or_default(),
                },
            }
        }
        "ARCHIVED" => LifecycleStatus::Archived {
            archive_id: archive_id
                .ok_or_else(|| conversion_err(11, "ARCHIVED without archive_id".to_string()))?,
        },
        other => return Err(conversion_err(9, format!("unexpected status '{}'", other))),
    };

    let updated_at_raw: String = row.get(19)?;
    let mut record = StudentLifecycleRecord::new(
        &student_id,
        &row.get::<_, String>(1)?,
        placement_from(row.get(2)?, row.get(3)?, row.get(4)?),
        row.get(5)?,
        PerformanceInputs {
            attendance_pct: row.get(6)?,
            academic_score: row.get(7)?,
            exam_result: parse_enum(8, &exam_raw, ExamResult::parse)?,
        },
        status,
    );
    record.proposed = placement_from(row.get(12)?, row.get(13)?, row.get(14)?);
    record.restore_selected_flag(row.get::<_, i64>(15)? != 0);
    record.batch_id = row.get(16)?;
    record.guardian_contact = row.get(17)?;
    record.restored_from_archive_id = row.get(18)?;
    record.updated_at = parse_ts(19, &updated_at_raw)?;
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::override_record::OverrideRecord;
    use crate::repository::override_repo::OverrideRecordRepository;

    fn setup() -> Arc<Mutex<Connection>> {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::init_schema(&conn).unwrap();
        Arc::new(Mutex::new(conn))
    }

    fn record(id: &str, status: LifecycleStatus) -> StudentLifecycleRecord {
        StudentLifecycleRecord::new(
            id,
            "Asha",
            Some(Placement::new("G5", "A", 3)),
            Some("2025-2026".to_string()),
            PerformanceInputs {
                attendance_pct: 72.0,
                academic_score: 64.0,
                exam_result: ExamResult::Pass,
            },
            status,
        )
    }

    #[test]
    fn test_save_and_find_eligible() {
        let conn = setup();
        let repo = StudentLifecycleRepository::new(conn.clone());
        let mut r = record("S1", LifecycleStatus::Eligible);
        r.set_selected(true).unwrap();
        {
            let c = conn.lock().unwrap();
            StudentLifecycleRepository::save_tx(&c, &r).unwrap();
        }

        let found = repo.find_by_id("S1").unwrap().unwrap();
        assert_eq!(found.status, LifecycleStatus::Eligible);
        assert!(found.is_selected());
        assert_eq!(found.placement, Some(Placement::new("G5", "A", 3)));
    }

    #[test]
    fn test_conditional_round_trip_restores_grant() {
        let conn = setup();
        let repo = StudentLifecycleRepository::new(conn.clone());
        let ov = OverrideRecord::new("S5", None, Reason::new("Medical exemption").unwrap(), "principal");
        {
            let c = conn.lock().unwrap();
            OverrideRecordRepository::insert_tx(&c, &ov).unwrap();
            let mut r = record("S5", LifecycleStatus::Conditional { grant: ov.grant() });
            r.set_selected(true).unwrap();
            StudentLifecycleRepository::save_tx(&c, &r).unwrap();
        }

        let found = repo.find_by_id("S5").unwrap().unwrap();
        let grant = found.status.override_grant().unwrap();
        assert_eq!(grant.reason.as_str(), "Medical exemption");
        assert_eq!(grant.approved_by, "principal");
    }

    #[test]
    fn test_active_cohort_excludes_archived() {
        let conn = setup();
        let repo = StudentLifecycleRepository::new(conn.clone());
        {
            let c = conn.lock().unwrap();
            StudentLifecycleRepository::save_tx(&c, &record("S1", LifecycleStatus::Eligible)).unwrap();
            StudentLifecycleRepository::save_tx(
                &c,
                &record("S2", LifecycleStatus::Archived { archive_id: "A1".to_string() }),
            )
            .unwrap();
        }
        let active = repo.find_active_by_cohort("G5", "2025-2026").unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].student_id, "S1");
    }
}
