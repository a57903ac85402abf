//! Token 预算控制
//!
//! 不依赖模型真实 tokenizer，按 4 字符 ≈ 1 token 向上取整做保守估算；
//! 预算 = context_window - 有效 max_tokens，超出时在本地拒绝，不发起网络请求。

use crate::llm::types::ChatMessage;

/// 每个 token 对应的字符数
pub const CHARS_PER_TOKEN: usize = 4;

/// Token 估算器（简单的字符计数近似）
pub struct TokenEstimator;

impl TokenEstimator {
    /// 估算文本的 token 数量：ceil(字符数 / 4)
    pub fn estimate(text: &str) -> usize {
        text.chars().count().div_ceil(CHARS_PER_TOKEN)
    }

    /// 估算整组消息：各消息内容以换行拼接后估算
    pub fn estimate_messages(messages: &[ChatMessage]) -> usize {
        let joined = messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        Self::estimate(&joined)
    }
}

/// 便捷函数，等价于 `TokenEstimator::estimate`
pub fn estimate_tokens(text: &str) -> usize {
    TokenEstimator::estimate(text)
}

/// 单次请求的 token 预算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBudget {
    context_window: u32,
    reserved_for_response: u32,
}

impl TokenBudget {
    pub fn new(context_window: u32, reserved_for_response: u32) -> Self {
        Self {
            context_window,
            reserved_for_response,
        }
    }

    /// 留给 prompt 的 token 数；响应预留超过上下文窗口时为负数
    pub fn prompt_budget(&self) -> i64 {
        i64::from(self.context_window) - i64::from(self.reserved_for_response)
    }

    /// 估算值严格大于预算时不允许发送
    pub fn allows(&self, estimated: usize) -> bool {
        i64::try_from(estimated).map_or(false, |e| e <= self.prompt_budget())
    }

    pub fn context_window(&self) -> u32 {
        self.context_window
    }

    pub fn reserved_for_response(&self) -> u32 {
        self.reserved_for_response
    }
}
