// ==========================================
// 学籍生命周期 - 行映射工具
// ==========================================
// 职责: 时间戳格式与枚举列解析的公共函数
// ==========================================

use chrono::NaiveDateTime;
use rusqlite::types::Type;

/// 库内统一时间戳格式
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn fmt_ts(ts: &NaiveDateTime) -> String {
    ts.format(TS_FORMAT).to_string()
}

pub fn now_ts() -> String {
    fmt_ts(&chrono::Local::now().naive_local())
}

/// 列值转换失败 → rusqlite 转换错误（保留列号）
pub fn conversion_err(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

pub fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<NaiveDateTime> {
    NaiveDateTime::parse_from_str(raw, TS_FORMAT)
        .map_err(|e| conversion_err(idx, format!("invalid timestamp '{}': {}", raw, e)))
}

pub fn parse_opt_ts(idx: usize, raw: Option<String>) -> rusqlite::Result<Option<NaiveDateTime>> {
    raw.map(|s| parse_ts(idx, &s)).transpose()
}

/// 解析枚举列（解析器返回 None 视为脏数据）
pub fn parse_enum<T>(idx: usize, raw: &str, parser: impl Fn(&str) -> Option<T>) -> rusqlite::Result<T> {
    parser(raw).ok_or_else(|| conversion_err(idx, format!("unexpected value '{}'", raw)))
}

/// 构建 IN 子句占位符: "col IN (?, ?, ?)"；空列表返回永假条件
pub fn build_in_clause<T: AsRef<str>>(column_name: &str, values: &[T]) -> String {
    if values.is_empty() {
        return "1 = 0".to_string();
    }
    let placeholders = values.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
    format!("{} IN ({})", column_name, placeholders)
}
