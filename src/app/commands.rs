// ==========================================
// 学籍生命周期 - 命令分发
// ==========================================
// 输入: JSON 命令字符串
// 输出: 成功为 JSON 结果；失败为 {code, message, details} 信封
// ==========================================

use serde::{Deserialize, Serialize};

use crate::api::{ApiError, OperatorCommand};
use crate::app::state::AppState;

/// 错误响应
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: String,

    /// 错误消息（当前语言）
    pub message: String,

    /// 出错实体与原因
    pub details: Option<serde_json::Value>,
}

impl From<&ApiError> for ErrorResponse {
    fn from(err: &ApiError) -> Self {
        Self {
            code: err.code().to_string(),
            message: err.localized_message(),
            details: Some(err.details()),
        }
    }
}

/// 将ApiError转换为JSON字符串
pub fn map_api_error(err: ApiError) -> String {
    let response = ErrorResponse::from(&err);
    serde_json::to_string(&response).unwrap_or_else(|_| err.to_string())
}

/// 解析并执行一条命令
pub fn dispatch_command(state: &AppState, raw: &str) -> Result<String, String> {
    let command: OperatorCommand = serde_json::from_str(raw)
        .map_err(|e| map_api_error(ApiError::validation(format!("命令格式错误: {}", e))))?;
    let name = command.name();

    match state.api.handle(command) {
        Ok(value) => serde_json::to_string(&value)
            .map_err(|e| map_api_error(ApiError::InternalError(format!("序列化失败: {}", e)))),
        Err(err) => {
            tracing::warn!(command = name, code = err.code(), error = %err, "命令执行失败");
            Err(map_api_error(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_envelope_fields() {
        let raw = map_api_error(ApiError::AlreadyExecuted {
            batch_id: "B1".to_string(),
        });
        let parsed: ErrorResponse = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.code, "ALREADY_EXECUTED");
        assert_eq!(parsed.details.unwrap()["batch_id"], "B1");
    }
}
