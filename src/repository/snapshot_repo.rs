// ==========================================
// 学籍生命周期 - 学年成绩快照仓储
// ==========================================

use crate::domain::snapshot::AcademicSnapshot;
use crate::domain::student::{PerformanceInputs, Placement};
use crate::domain::types::ExamResult;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::{fmt_ts, parse_enum, parse_ts};
use rusqlite::{params, Connection};
use std::sync::{Arc, Mutex};

pub struct AcademicSnapshotRepository {
    conn: Arc<Mutex<Connection>>,
}

impl AcademicSnapshotRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn insert_tx(conn: &Connection, snapshot: &AcademicSnapshot) -> RepositoryResult<()> {
        let placement = snapshot.placement.as_ref();
        conn.execute(
            r#"INSERT INTO academic_snapshot (
                snapshot_id, student_id, batch_id, class_id, section, roll, academic_year,
                attendance_pct, academic_score, exam_result, final_status, override_id, captured_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            params![
                snapshot.snapshot_id,
                snapshot.student_id,
                snapshot.batch_id,
                placement.map(|p| p.class_id.as_str()),
                placement.map(|p| p.section.as_str()),
                placement.map(|p| p.roll as i64),
                snapshot.academic_year,
                snapshot.performance.attendance_pct,
                snapshot.performance.academic_score,
                snapshot.performance.exam_result.as_str(),
                snapshot.final_status,
                snapshot.override_id,
                fmt_ts(&snapshot.captured_at),
            ],
        )?;
        Ok(())
    }

    /// 学生历年快照（旧 → 新）
    pub fn find_by_student(&self, student_id: &str) -> RepositoryResult<Vec<AcademicSnapshot>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT snapshot_id, student_id, batch_id, class_id, section, roll, academic_year,
                      attendance_pct, academic_score, exam_result, final_status, override_id, captured_at
               FROM academic_snapshot WHERE student_id = ?
               ORDER BY captured_at, rowid"#,
        )?;
        let snapshots = stmt
            .query_map(params![student_id], |row| {
                let class_id: Option<String> = row.get(3)?;
                let section: Option<String> = row.get(4)?;
                let roll: Option<i64> = row.get(5)?;
                let exam_raw: String = row.get(9)?;
                let captured_raw: String = row.get(12)?;
                Ok(AcademicSnapshot {
                    snapshot_id: row.get(0)?,
                    student_id: row.get(1)?,
                    batch_id: row.get(2)?,
                    placement: match (class_id, section, roll) {
                        (Some(c), Some(s), Some(r)) => Some(Placement::new(&c, &s, r.max(0) as u32)),
                        _ => None,
                    },
                    academic_year: row.get(6)?,
                    performance: PerformanceInputs {
                        attendance_pct: row.get(7)?,
                        academic_score: row.get(8)?,
                        exam_result: parse_enum(9, &exam_raw, ExamResult::parse)?,
                    },
                    final_status: row.get(10)?,
                    override_id: row.get(11)?,
                    captured_at: parse_ts(12, &captured_raw)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(snapshots)
    }
}
