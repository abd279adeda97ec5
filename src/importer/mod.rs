// ==========================================
// 学籍生命周期 - 导入层
// ==========================================
// 职责: 外部花名册导入（CSV），写入内置花名册
// ==========================================

pub mod error;
pub mod roster_csv;
pub mod roster_importer;

// 重导出核心类型
pub use error::{ImportError, ImportResult};
pub use roster_csv::{RosterCsvParser, ROSTER_HEADERS};
pub use roster_importer::{RosterImportSummary, RosterImporter};
