// ==========================================
// 学籍生命周期 - 花名册导入器
// ==========================================
// 流程: 解析 → 校验（全量通过才落库）→ 写入内置花名册
// ==========================================

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::instrument;

use crate::importer::error::ImportResult;
use crate::importer::roster_csv::RosterCsvParser;
use crate::repository::RosterDirectoryRepository;

/// 导入结果
#[derive(Debug, Clone, Serialize)]
pub struct RosterImportSummary {
    pub imported: usize,
    /// "班级/学年" → 人数
    pub cohorts: BTreeMap<String, usize>,
    pub elapsed_ms: u64,
}

pub struct RosterImporter {
    directory: Arc<RosterDirectoryRepository>,
    parser: RosterCsvParser,
}

impl RosterImporter {
    pub fn new(directory: Arc<RosterDirectoryRepository>) -> Self {
        Self {
            directory,
            parser: RosterCsvParser,
        }
    }

    /// 从 CSV 文件导入
    #[instrument(skip(self, file_path))]
    pub fn import_file<P: AsRef<Path>>(&self, file_path: P) -> ImportResult<RosterImportSummary> {
        let start = std::time::Instant::now();
        let path = file_path.as_ref();
        tracing::info!(file_path = %path.display(), "开始导入花名册");

        let members = self.parser.parse_file(path).map_err(|e| {
            tracing::error!(error = %e, "花名册解析失败");
            e
        })?;

        let mut cohorts: BTreeMap<String, usize> = BTreeMap::new();
        for m in &members {
            *cohorts
                .entry(format!("{}/{}", m.placement.class_id, m.academic_year))
                .or_default() += 1;
        }

        let imported = self.directory.upsert_members(&members)?;
        let elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::info!(imported, cohorts = cohorts.len(), elapsed_ms, "花名册导入完成");

        Ok(RosterImportSummary {
            imported,
            cohorts,
            elapsed_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use std::io::Write;
    use std::sync::Mutex;

    #[test]
    fn test_import_file_into_directory() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_schema(&conn).unwrap();
        let directory = Arc::new(RosterDirectoryRepository::new(Arc::new(Mutex::new(conn))));

        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "{}", crate::importer::ROSTER_HEADERS.join(",")).unwrap();
        writeln!(file, "S1,Asha,G5,A,1,2025-2026,92,81,Pass,").unwrap();
        writeln!(file, "S2,Bela,G5,A,2,2025-2026,88,77,Pass,").unwrap();
        writeln!(file, "S9,Chen,G6,A,1,2025-2026,90,70,Pass,").unwrap();

        let summary = RosterImporter::new(directory.clone()).import_file(file.path()).unwrap();
        assert_eq!(summary.imported, 3);
        assert_eq!(summary.cohorts.get("G5/2025-2026"), Some(&2));
        assert_eq!(directory.list_cohort("G5", "2025-2026").unwrap().len(), 2);
    }
}
