// ==========================================
// 学籍生命周期 - 内置花名册/班级容量仓储
// ==========================================
// 外部花名册服务与容量服务的 SQLite 实现
// 表: student_directory / class_capacity
// ==========================================

use crate::domain::capacity::{ClassCapacity, SeatLimit};
use crate::domain::roster::CohortMember;
use crate::domain::student::{PerformanceInputs, Placement};
use crate::domain::types::ExamResult;
use crate::repository::error::{RepositoryError, RepositoryResult};
use crate::repository::row_utils::parse_enum;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};

pub struct RosterDirectoryRepository {
    conn: Arc<Mutex<Connection>>,
}

impl RosterDirectoryRepository {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    // ==========================================
    // 花名册
    // ==========================================

    /// 批量写入花名册（按 student_id 覆盖）
    pub fn upsert_members(&self, members: &[CohortMember]) -> RepositoryResult<usize> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare(
                r#"INSERT INTO student_directory (
                    student_id, name, class_id, section, roll, academic_year,
                    attendance_pct, academic_score, exam_result, guardian_contact
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(student_id) DO UPDATE SET
                    name = excluded.name,
                    class_id = excluded.class_id,
                    section = excluded.section,
                    roll = excluded.roll,
                    academic_year = excluded.academic_year,
                    attendance_pct = excluded.attendance_pct,
                    academic_score = excluded.academic_score,
                    exam_result = excluded.exam_result,
                    guardian_contact = excluded.guardian_contact"#,
            )?;
            for m in members {
                stmt.execute(params![
                    m.student_id,
                    m.name,
                    m.placement.class_id,
                    m.placement.section,
                    m.placement.roll as i64,
                    m.academic_year,
                    m.performance.attendance_pct,
                    m.performance.academic_score,
                    m.performance.exam_result.as_str(),
                    m.guardian_contact,
                ])?;
            }
        }
        tx.commit()?;
        Ok(members.len())
    }

    /// 班级/学年花名册（按学号）
    pub fn list_cohort(&self, class_id: &str, academic_year: &str) -> RepositoryResult<Vec<CohortMember>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT student_id, name, class_id, section, roll, academic_year,
                      attendance_pct, academic_score, exam_result, guardian_contact
               FROM student_directory
               WHERE class_id = ? AND academic_year = ?
               ORDER BY roll, student_id"#,
        )?;
        let members = stmt
            .query_map(params![class_id, academic_year], map_member)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(members)
    }

    pub fn find_member(&self, student_id: &str) -> RepositoryResult<Option<CohortMember>> {
        let conn = self.get_conn()?;
        let member = conn
            .query_row(
                r#"SELECT student_id, name, class_id, section, roll, academic_year,
                          attendance_pct, academic_score, exam_result, guardian_contact
                   FROM student_directory WHERE student_id = ?"#,
                params![student_id],
                map_member,
            )
            .optional()?;
        Ok(member)
    }

    /// 改写学生编班，并同步两端班级的在读人数
    ///
    /// 返回改写前的 (编班, 学年)，供补偿使用
    pub fn apply_placement(
        &self,
        student_id: &str,
        placement: &Placement,
        academic_year: &str,
    ) -> RepositoryResult<(Placement, String)> {
        let conn = self.get_conn()?;
        let tx = conn.unchecked_transaction()?;

        let previous: Option<(String, String, i64, String)> = tx
            .query_row(
                "SELECT class_id, section, roll, academic_year FROM student_directory WHERE student_id = ?",
                params![student_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .optional()?;
        let Some((prev_class, prev_section, prev_roll, prev_year)) = previous else {
            return Err(RepositoryError::NotFound {
                entity: "StudentDirectory".to_string(),
                id: student_id.to_string(),
            });
        };

        tx.execute(
            r#"UPDATE student_directory
               SET class_id = ?, section = ?, roll = ?, academic_year = ?
               WHERE student_id = ?"#,
            params![
                placement.class_id,
                placement.section,
                placement.roll as i64,
                academic_year,
                student_id,
            ],
        )?;
        tx.execute(
            r#"UPDATE class_capacity SET current_enrolled = MAX(current_enrolled - 1, 0)
               WHERE class_id = ? AND academic_year = ?"#,
            params![prev_class, prev_year],
        )?;
        tx.execute(
            r#"UPDATE class_capacity SET current_enrolled = current_enrolled + 1
               WHERE class_id = ? AND academic_year = ?"#,
            params![placement.class_id, academic_year],
        )?;
        tx.commit()?;

        Ok((
            Placement::new(&prev_class, &prev_section, prev_roll.max(0) as u32),
            prev_year,
        ))
    }

    // ==========================================
    // 班级容量
    // ==========================================

    pub fn set_capacity(&self, capacity: &ClassCapacity) -> RepositoryResult<()> {
        let conn = self.get_conn()?;
        conn.execute(
            r#"INSERT INTO class_capacity (class_id, academic_year, capacity, current_enrolled)
               VALUES (?, ?, ?, ?)
               ON CONFLICT(class_id, academic_year) DO UPDATE SET
                   capacity = excluded.capacity,
                   current_enrolled = excluded.current_enrolled"#,
            params![
                capacity.class_id,
                capacity.academic_year,
                capacity.seat_limit.to_db(),
                capacity.current_enrolled as i64,
            ],
        )?;
        Ok(())
    }

    /// 读取容量；未登记的班级视为不限座位、当前 0 人
    pub fn get_capacity(&self, class_id: &str, academic_year: &str) -> RepositoryResult<ClassCapacity> {
        let conn = self.get_conn()?;
        let row: Option<(Option<i64>, i64)> = conn
            .query_row(
                "SELECT capacity, current_enrolled FROM class_capacity WHERE class_id = ? AND academic_year = ?",
                params![class_id, academic_year],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let (capacity, enrolled) = row.unwrap_or((None, 0));
        Ok(ClassCapacity {
            class_id: class_id.to_string(),
            academic_year: academic_year.to_string(),
            seat_limit: SeatLimit::from_db(capacity),
            current_enrolled: enrolled.max(0) as u32,
        })
    }
}

fn map_member(row: &Row) -> rusqlite::Result<CohortMember> {
    let exam_raw: String = row.get(8)?;
    Ok(CohortMember {
        student_id: row.get(0)?,
        name: row.get(1)?,
        placement: Placement {
            class_id: row.get(2)?,
            section: row.get(3)?,
            roll: row.get::<_, i64>(4)?.max(0) as u32,
        },
        academic_year: row.get(5)?,
        performance: PerformanceInputs {
            attendance_pct: row.get(6)?,
            academic_score: row.get(7)?,
            exam_result: parse_enum(8, &exam_raw, ExamResult::parse)?,
        },
        guardian_contact: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> RosterDirectoryRepository {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        RosterDirectoryRepository::new(Arc::new(Mutex::new(conn)))
    }

    fn member(id: &str, roll: u32) -> CohortMember {
        CohortMember {
            student_id: id.to_string(),
            name: format!("Student {}", id),
            placement: Placement::new("G5", "A", roll),
            academic_year: "2025-2026".to_string(),
            performance: PerformanceInputs {
                attendance_pct: 90.0,
                academic_score: 70.0,
                exam_result: ExamResult::Pass,
            },
            guardian_contact: None,
        }
    }

    #[test]
    fn test_unregistered_class_is_unlimited() {
        let repo = setup();
        let cap = repo.get_capacity("ALUMNI", "2026-2027").unwrap();
        assert_eq!(cap.seat_limit, SeatLimit::Unlimited);
        assert_eq!(cap.current_enrolled, 0);
    }

    #[test]
    fn test_apply_placement_moves_enrolment() {
        let repo = setup();
        repo.upsert_members(&[member("S1", 2), member("S2", 1)]).unwrap();
        for (class, year, enrolled) in [("G5", "2025-2026", 2), ("G6", "2026-2027", 12)] {
            repo.set_capacity(&ClassCapacity {
                class_id: class.to_string(),
                academic_year: year.to_string(),
                seat_limit: SeatLimit::Limited(35),
                current_enrolled: enrolled,
            })
            .unwrap();
        }

        let cohort = repo.list_cohort("G5", "2025-2026").unwrap();
        assert_eq!(cohort[0].student_id, "S2");

        let (prev, prev_year) = repo
            .apply_placement("S1", &Placement::new("G6", "A", 13), "2026-2027")
            .unwrap();
        assert_eq!(prev, Placement::new("G5", "A", 2));
        assert_eq!(prev_year, "2025-2026");
        assert_eq!(repo.get_capacity("G6", "2026-2027").unwrap().current_enrolled, 13);
        assert_eq!(repo.get_capacity("G5", "2025-2026").unwrap().current_enrolled, 1);
        assert!(repo.apply_placement("S9", &prev, "2025-2026").is_err());
    }
}
