// ==========================================
// 学籍生命周期 - 性能统计
// ==========================================
// 用途: 批次执行 / 批量归档等重操作的耗时与 SQL 计数
// ==========================================

use rusqlite::Connection;
use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

static PERF_SQL_ENABLED: AtomicBool = AtomicBool::new(false);
static SLOW_SQL_THRESHOLD_MS: AtomicU64 = AtomicU64::new(0);

thread_local! {
    static PERF_DEPTH: Cell<u32> = Cell::new(0);
    static SQL_COUNT: Cell<u64> = Cell::new(0);
}

fn env_flag(v: &str) -> bool {
    matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

fn shorten_sql(sql: &str, max_len: usize) -> String {
    let s = sql.split_whitespace().collect::<Vec<_>>().join(" ");
    if s.chars().count() <= max_len {
        return s;
    }
    let head: String = s.chars().take(max_len).collect();
    format!("{}…", head)
}

/// 安装 SQLite 语句 trace/profile（SQL 计数 + 慢查询日志）
///
/// 开关：
/// - Debug 默认开启；Release 默认关闭
/// - `STUDENT_LIFECYCLE_PERF_SQL=1` 强制开启
/// - `STUDENT_LIFECYCLE_SLOW_SQL_MS=50` 慢 SQL 阈值（毫秒）
pub fn install_sqlite_tracing(conn: &mut Connection) {
    let enabled = match std::env::var("STUDENT_LIFECYCLE_PERF_SQL") {
        Ok(v) => env_flag(&v),
        Err(_) => cfg!(debug_assertions),
    };
    PERF_SQL_ENABLED.store(enabled, Ordering::Relaxed);

    if !enabled {
        conn.trace(None);
        conn.profile(None);
        return;
    }

    let slow_ms = std::env::var("STUDENT_LIFECYCLE_SLOW_SQL_MS")
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(100);
    SLOW_SQL_THRESHOLD_MS.store(slow_ms, Ordering::Relaxed);

    conn.trace(Some(on_sql_trace));
    conn.profile(Some(on_sql_profile));
}

fn on_sql_trace(_sql: &str) {
    if !PERF_SQL_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    if PERF_DEPTH.with(|d| d.get() > 0) {
        SQL_COUNT.with(|c| c.set(c.get().saturating_add(1)));
    }
}

fn on_sql_profile(sql: &str, duration: Duration) {
    if !PERF_SQL_ENABLED.load(Ordering::Relaxed) {
        return;
    }
    let ms = duration.as_millis() as u64;
    let threshold = SLOW_SQL_THRESHOLD_MS.load(Ordering::Relaxed);
    if threshold > 0 && ms >= threshold {
        tracing::warn!(
            target: "slow_sql",
            duration_ms = ms,
            sql = %shorten_sql(sql, 300),
            "slow sql"
        );
    }
}

/// 性能统计 Guard：drop 时记录 elapsed_ms + SQL 语句数
///
/// ```ignore
/// let _perf = student_lifecycle::perf::PerfGuard::new("promotion.execute").with_label(&batch_id);
/// ```
pub struct PerfGuard {
    op: &'static str,
    label: Option<String>,
    start: Instant,
    sql_start: u64,
}

impl PerfGuard {
    pub fn new(op: &'static str) -> Self {
        PERF_DEPTH.with(|d| d.set(d.get().saturating_add(1)));
        Self {
            op,
            label: None,
            start: Instant::now(),
            sql_start: SQL_COUNT.with(|c| c.get()),
        }
    }

    /// 附加业务标识（批次ID、班级等）
    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }
}

impl Drop for PerfGuard {
    fn drop(&mut self) {
        let elapsed_ms = self.start.elapsed().as_millis() as u64;
        let sql_count = SQL_COUNT.with(|c| c.get()).saturating_sub(self.sql_start);

        tracing::info!(
            target: "perf",
            op = self.op,
            label = self.label.as_deref().unwrap_or("-"),
            elapsed_ms,
            sql_count,
            "done"
        );

        PERF_DEPTH.with(|d| d.set(d.get().saturating_sub(1)));
    }
}
