//! 调用错误分类
//!
//! 执行器内部以 `Result<Completion, CallError>` 传播错误，在边界处统一转为 CallResult::Failure。
//! Display 文本即面向调用方（通常是上层 Agent）的自描述消息，可原样透传。

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// HTTP 错误响应体在消息中保留的最大字符数
const MAX_ERROR_BODY_CHARS: usize = 2000;

/// 本地 LLM 调用过程中可能出现的错误（配置缺失、预检拒绝、网络、HTTP 状态等）
#[derive(Error, Debug)]
pub enum CallError {
    /// 未配置可用的本地端点：表示「功能不可用」，而非硬失败
    #[error("Local LLM is not configured (no base URL or no usable models)")]
    ConfigAbsent,

    #[error("Prompt must not be empty")]
    EmptyPrompt,

    /// 目录为空；Config Resolver 已保证不会出现，仅作兜底
    #[error("No local model available in the catalog")]
    NoMatchingModel,

    #[error(
        "Prompt too large for model {model}: estimated ~{estimated} tokens exceeds the budget of {budget} tokens \
         (context window {context_window} minus {max_tokens} reserved for the response). \
         Break the task into smaller pieces and call again."
    )]
    PromptTooLarge {
        model: String,
        estimated: usize,
        budget: i64,
        context_window: u32,
        max_tokens: u32,
    },

    #[error("Local LLM request timed out after {}", format_duration(.elapsed))]
    Timeout { elapsed: Duration },

    #[error("Cannot connect to local LLM at {base_url}. Is the server running? ({reason})")]
    Unreachable { base_url: String, reason: String },

    #[error("Local LLM request was cancelled")]
    Cancelled,

    #[error("Local LLM returned HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    #[error("Local LLM call failed: {0}")]
    UnknownFailure(String),
}

impl CallError {
    /// 构造 HttpError，过长的响应体截断
    pub fn http(status: u16, body: &str) -> Self {
        let body = body.trim();
        let body = if body.chars().count() > MAX_ERROR_BODY_CHARS {
            format!(
                "{}...[truncated]",
                body.chars().take(MAX_ERROR_BODY_CHARS).collect::<String>()
            )
        } else {
            body.to_string()
        };
        CallError::HttpError { status, body }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            CallError::ConfigAbsent => FailureKind::ConfigAbsent,
            CallError::EmptyPrompt => FailureKind::EmptyPrompt,
            CallError::NoMatchingModel => FailureKind::NoMatchingModel,
            CallError::PromptTooLarge { .. } => FailureKind::PromptTooLarge,
            CallError::Timeout { .. } => FailureKind::Timeout,
            CallError::Unreachable { .. } => FailureKind::Unreachable,
            CallError::Cancelled => FailureKind::Cancelled,
            CallError::HttpError { .. } => FailureKind::HttpError,
            CallError::UnknownFailure(_) => FailureKind::UnknownFailure,
        }
    }

    /// 是否为本地预检拒绝（未发出任何网络请求）
    pub fn is_local_rejection(&self) -> bool {
        matches!(
            self,
            CallError::ConfigAbsent
                | CallError::EmptyPrompt
                | CallError::NoMatchingModel
                | CallError::PromptTooLarge { .. }
        )
    }
}

/// 失败类别（供机器消费，序列化为 snake_case）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ConfigAbsent,
    EmptyPrompt,
    NoMatchingModel,
    PromptTooLarge,
    Timeout,
    Unreachable,
    Cancelled,
    HttpError,
    UnknownFailure,
}

/// 整秒显示为 `120s`，否则显示毫秒
fn format_duration(d: &Duration) -> String {
    if d.subsec_millis() == 0 {
        format!("{}s", d.as_secs())
    } else {
        format!("{}ms", d.as_millis())
    }
}
