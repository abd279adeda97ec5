// ==========================================
// 学籍生命周期 - 导入模块错误类型
// ==========================================
// 工具: thiserror 派生宏
// 约定: 行级错误带行号（含表头，从 1 开始计）与字段名
// ==========================================

use thiserror::Error;

use crate::repository::RepositoryError;

/// 花名册导入错误；任一行出错整份文件不落库
#[derive(Error, Debug)]
pub enum ImportError {
    // ===== 文件相关错误 =====
    #[error("文件不存在: {0}")]
    FileNotFound(String),

    #[error("文件格式不支持: {0}（仅支持 .csv）")]
    UnsupportedFormat(String),

    #[error("文件读取失败: {0}")]
    FileReadError(String),

    #[error("CSV 解析失败: {0}")]
    CsvParseError(String),

    #[error("表头缺少列: {0}")]
    MissingColumn(String),

    // ===== 行级错误 =====
    #[error("必填字段为空 (行 {row}, 字段 {field})")]
    FieldMissing { row: usize, field: String },

    #[error("类型转换失败 (行 {row}, 字段 {field}): {message}")]
    TypeConversionError {
        row: usize,
        field: String,
        message: String,
    },

    #[error("数值范围错误 (行 {row}, 字段 {field}): 值 {value} 超出范围 [{min}, {max}]")]
    ValueRangeError {
        row: usize,
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("学生重复 (行 {row}): {student_id}")]
    DuplicateStudent { row: usize, student_id: String },

    // ===== 落库错误 =====
    #[error("花名册写入失败: {0}")]
    DatabaseError(#[from] RepositoryError),
}

impl ImportError {
    /// 行号（文件级错误返回 None）
    pub fn row(&self) -> Option<usize> {
        match self {
            ImportError::FieldMissing { row, .. }
            | ImportError::TypeConversionError { row, .. }
            | ImportError::ValueRangeError { row, .. }
            | ImportError::DuplicateStudent { row, .. } => Some(*row),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ImportError {
    fn from(err: std::io::Error) -> Self {
        ImportError::FileReadError(err.to_string())
    }
}

impl From<csv::Error> for ImportError {
    fn from(err: csv::Error) -> Self {
        ImportError::CsvParseError(err.to_string())
    }
}

pub type ImportResult<T> = Result<T, ImportError>;
