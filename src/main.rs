// ==========================================
// 学籍生命周期 - 操作员控制台
// ==========================================
// 用法: 每行一条 JSON 命令（stdin），每行一条 JSON 响应（stdout）
// 环境变量: STUDENT_LIFECYCLE_DB_PATH / STUDENT_LIFECYCLE_LOCALE
//           STUDENT_LIFECYCLE_LOG_FORMAT=json / RUST_LOG
// 例: {"command":"SelectSourceCohort","source_class":"G5","source_year":"2025-2026"}
// ==========================================

use std::io::{self, BufRead, Write};

use anyhow::Context;
use serde_json::json;
use student_lifecycle::app::{dispatch_command, get_default_db_path, AppState};

fn main() -> anyhow::Result<()> {
    match std::env::var("STUDENT_LIFECYCLE_LOG_FORMAT").as_deref() {
        Ok("json") => student_lifecycle::logging::init_json(),
        _ => student_lifecycle::logging::init(),
    }

    tracing::info!("==================================================");
    tracing::info!("{} - 操作员控制台", student_lifecycle::APP_NAME);
    tracing::info!("系统版本: {}", student_lifecycle::VERSION);
    tracing::info!("==================================================");

    // 错误信封文本语言（默认 zh-CN）
    if let Ok(locale) = std::env::var("STUDENT_LIFECYCLE_LOCALE") {
        student_lifecycle::i18n::set_locale(locale.trim());
    }
    tracing::info!("当前语言: {}", student_lifecycle::i18n::current_locale());

    let db_path = std::env::args().nth(1).unwrap_or_else(get_default_db_path);
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path)
        .map_err(anyhow::Error::msg)
        .context("无法初始化AppState")?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    let mut out = stdout.lock();

    for line in stdin.lock().lines() {
        let line = line.context("读取 stdin 失败")?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let response = match dispatch_command(&state, trimmed) {
            Ok(body) => format!(r#"{{"ok":true,"result":{}}}"#, body),
            Err(envelope) => {
                let error: serde_json::Value =
                    serde_json::from_str(&envelope).unwrap_or_else(|_| json!({ "message": envelope }));
                json!({ "ok": false, "error": error }).to_string()
            }
        };
        writeln!(out, "{}", response).context("写入 stdout 失败")?;
        out.flush().context("写入 stdout 失败")?;
    }

    tracing::info!("控制台退出");
    Ok(())
}
