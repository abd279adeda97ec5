// ==========================================
// 学籍生命周期 - 花名册 CSV 解析
// ==========================================
// 表头: student_id,name,class,section,roll,academic_year,
//       attendance_pct,academic_score,exam_result,guardian_contact
// guardian_contact 可为空；其余必填
// ==========================================

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::ReaderBuilder;

use crate::domain::roster::CohortMember;
use crate::domain::student::{PerformanceInputs, Placement};
use crate::domain::types::ExamResult;
use crate::importer::error::{ImportError, ImportResult};

/// 花名册列（顺序即导出顺序）
pub const ROSTER_HEADERS: [&str; 10] = [
    "student_id",
    "name",
    "class",
    "section",
    "roll",
    "academic_year",
    "attendance_pct",
    "academic_score",
    "exam_result",
    "guardian_contact",
];

const OPTIONAL_HEADERS: [&str; 1] = ["guardian_contact"];

pub struct RosterCsvParser;

impl RosterCsvParser {
    /// 解析 CSV 文件
    pub fn parse_file(&self, path: &Path) -> ImportResult<Vec<CohortMember>> {
        if !path.exists() {
            return Err(ImportError::FileNotFound(path.display().to_string()));
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();
        if ext != "csv" {
            return Err(ImportError::UnsupportedFormat(ext));
        }

        let file = File::open(path)?;
        self.parse_reader(file)
    }

    /// 从任意 Reader 解析（测试与标准输入复用）
    pub fn parse_reader<R: Read>(&self, reader: R) -> ImportResult<Vec<CohortMember>> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_lowercase())
            .collect();
        for required in ROSTER_HEADERS.iter().filter(|h| !OPTIONAL_HEADERS.contains(h)) {
            if !headers.iter().any(|h| h == required) {
                return Err(ImportError::MissingColumn(required.to_string()));
            }
        }

        let mut members = Vec::new();
        let mut seen = HashSet::new();
        for (idx, result) in reader.records().enumerate() {
            let row_no = idx + 2;
            let record = result?;

            let row: HashMap<&str, &str> = headers
                .iter()
                .map(String::as_str)
                .zip(record.iter())
                .collect();

            // 跳过完全空白的行
            if row.values().all(|v| v.is_empty()) {
                continue;
            }

            let member = map_row(&row, row_no)?;
            if !seen.insert(member.student_id.clone()) {
                return Err(ImportError::DuplicateStudent {
                    row: row_no,
                    student_id: member.student_id,
                });
            }
            members.push(member);
        }

        tracing::debug!(rows = members.len(), "花名册解析完成");
        Ok(members)
    }
}

fn map_row(row: &HashMap<&str, &str>, row_no: usize) -> ImportResult<CohortMember> {
    let attendance_pct = parse_f64(row, "attendance_pct", row_no)?;
    if !(0.0..=100.0).contains(&attendance_pct) {
        return Err(ImportError::ValueRangeError {
            row: row_no,
            field: "attendance_pct".to_string(),
            value: attendance_pct,
            min: 0.0,
            max: 100.0,
        });
    }

    let roll_raw = required(row, "roll", row_no)?;
    let roll = roll_raw
        .parse::<u32>()
        .ok()
        .filter(|&r| r > 0)
        .ok_or_else(|| ImportError::TypeConversionError {
            row: row_no,
            field: "roll".to_string(),
            message: format!("期望正整数，实际 {}", roll_raw),
        })?;

    let exam_raw = required(row, "exam_result", row_no)?;
    let exam_result = ExamResult::parse(exam_raw).ok_or_else(|| ImportError::TypeConversionError {
        row: row_no,
        field: "exam_result".to_string(),
        message: format!("期望 PASS/FAIL/WITHHELD，实际 {}", exam_raw),
    })?;

    Ok(CohortMember {
        student_id: required(row, "student_id", row_no)?.to_string(),
        name: required(row, "name", row_no)?.to_string(),
        placement: Placement::new(
            required(row, "class", row_no)?,
            required(row, "section", row_no)?,
            roll,
        ),
        academic_year: required(row, "academic_year", row_no)?.to_string(),
        performance: PerformanceInputs {
            attendance_pct,
            academic_score: parse_f64(row, "academic_score", row_no)?,
            exam_result,
        },
        guardian_contact: row
            .get("guardian_contact")
            .filter(|v| !v.is_empty())
            .map(|v| v.to_string()),
    })
}

fn required<'a>(row: &HashMap<&str, &'a str>, field: &str, row_no: usize) -> ImportResult<&'a str> {
    match row.get(field) {
        Some(v) if !v.is_empty() => Ok(*v),
        _ => Err(ImportError::FieldMissing {
            row: row_no,
            field: field.to_string(),
        }),
    }
}

fn parse_f64(row: &HashMap<&str, &str>, field: &str, row_no: usize) -> ImportResult<f64> {
    let raw = required(row, field, row_no)?;
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ImportError::TypeConversionError {
            row: row_no,
            field: field.to_string(),
            message: format!("期望数值，实际 {}", raw),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HEADER: &str = "student_id,name,class,section,roll,academic_year,attendance_pct,academic_score,exam_result,guardian_contact";

    fn parse(body: &str) -> ImportResult<Vec<CohortMember>> {
        RosterCsvParser.parse_reader(format!("{}\n{}", HEADER, body).as_bytes())
    }

    #[test]
    fn test_parse_valid_rows() {
        let members = parse(
            "S1,Asha,G5,A,1,2025-2026,92,81.5,Pass,+91-9000000001\n\
             S5,Ravi,G5,B,5,2025-2026,72,64,PASS,",
        )
        .unwrap();
        assert_eq!(members.len(), 2);
        assert_eq!(members[0].placement, Placement::new("G5", "A", 1));
        assert_eq!(members[0].performance.exam_result, ExamResult::Pass);
        assert_eq!(members[0].guardian_contact.as_deref(), Some("+91-9000000001"));
        assert_eq!(members[1].guardian_contact, None);
    }

    #[test]
    fn test_attendance_out_of_range_names_row_and_field() {
        let err = parse("S1,Asha,G5,A,1,2025-2026,101,80,Pass,").unwrap_err();
        match err {
            ImportError::ValueRangeError { row, field, .. } => {
                assert_eq!(row, 2);
                assert_eq!(field, "attendance_pct");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_bad_exam_result_and_missing_field() {
        let err = parse("S1,Asha,G5,A,1,2025-2026,90,80,Maybe,").unwrap_err();
        assert!(matches!(err, ImportError::TypeConversionError { ref field, .. } if field == "exam_result"));

        let err = parse("S1,,G5,A,1,2025-2026,90,80,Pass,").unwrap_err();
        assert_eq!(err.row(), Some(2));
    }

    #[test]
    fn test_duplicate_student_rejected() {
        let err = parse(
            "S1,Asha,G5,A,1,2025-2026,90,80,Pass,\n\
             S1,Asha,G5,A,1,2025-2026,90,80,Pass,",
        )
        .unwrap_err();
        assert!(matches!(err, ImportError::DuplicateStudent { row: 3, .. }));
    }

    #[test]
    fn test_missing_column() {
        let err = RosterCsvParser
            .parse_reader("student_id,name\nS1,Asha".as_bytes())
            .unwrap_err();
        assert!(matches!(err, ImportError::MissingColumn(_)));
    }

    #[test]
    fn test_parse_file_skips_blank_rows() {
        let mut temp_file: NamedTempFile = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(temp_file, "{}", HEADER).unwrap();
        writeln!(temp_file, "S1,Asha,G5,A,1,2025-2026,92,81,Pass,").unwrap();
        writeln!(temp_file, ",,,,,,,,,").unwrap();
        writeln!(temp_file, "S2,Bela,G5,A,2,2025-2026,88,77,Pass,").unwrap();

        let members = RosterCsvParser.parse_file(temp_file.path()).unwrap();
        assert_eq!(members.len(), 2);
    }
}
