//! Local LLM - 本地 LLM 卸载客户端
//!
//! 把低价值任务路由到本地 OpenAI 兼容推理服务，减少付费远程模型的调用。
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量），产出原始 provider 配置
//! - **core**: 调用错误分类
//! - **llm**: 端点解析、模型选择、Token 预算与请求执行
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod llm;
pub mod observability;

pub use crate::core::{CallError, FailureKind};
pub use llm::{
    call_local_llm, execute, CallParams, CallResult, EndpointConfig, LlmClient, LocalLlmClient,
    ModelInfo,
};
