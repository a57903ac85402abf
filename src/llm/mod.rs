//! LLM 层：本地 OpenAI 兼容端点的配置解析、模型选择、预算检查与请求执行

pub mod client;
pub mod endpoint;
pub mod selector;
pub mod token_budget;
pub mod traits;
pub mod types;

pub use client::{
    build_messages, call_local_llm, effective_max_tokens, execute, LocalLlmClient,
    PreparedRequest, DEFAULT_REQUEST_TIMEOUT,
};
pub use endpoint::{resolve_endpoint, resolve_from_app_config};
pub use selector::{select_from, select_model, MatchKind, MODEL_ALIASES};
pub use token_budget::{estimate_tokens, TokenBudget, TokenEstimator};
pub use traits::LlmClient;
pub use types::{
    CallParams, CallResult, ChatCompletionRequest, ChatMessage, Completion, EndpointConfig,
    ModelInfo, Role, Usage, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};
