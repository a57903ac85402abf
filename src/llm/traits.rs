//! LLM 客户端抽象
//!
//! 上层工具层只依赖 LlmClient：传入 CallParams，得到成功 / 失败二选一的 CallResult，不会收到 panic 或 Err。

use async_trait::async_trait;

use crate::llm::types::{CallParams, CallResult, ModelInfo};

/// LLM 客户端 trait：单次无状态调用
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// 执行一次调用；所有失败都以 CallResult::Failure 返回
    async fn complete(&self, params: &CallParams) -> CallResult;

    /// 可选模型目录（按配置顺序）
    fn models(&self) -> &[ModelInfo];
}
