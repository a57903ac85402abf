//! 本地 LLM 调用的数据模型：端点、模型目录、调用参数与结果

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{CallError, FailureKind};

/// 未指定或非正数时的默认响应上限
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

/// 未指定时的默认采样温度
pub const DEFAULT_TEMPERATURE: f64 = 0.7;

/// 模型目录中的一项（不可变值对象）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    /// 线上请求使用的唯一标识
    pub id: String,
    /// 展示名，缺省等于 id
    pub name: String,
    /// 总 token 容量，恒 > 0
    pub context_window: u32,
    /// 默认响应上限，恒 > 0
    pub max_tokens: u32,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, context_window: u32) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            context_window,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }
}

/// 已校验、规范化的端点描述；models 恒非空，只能经由 Config Resolver 或 `EndpointConfig::new` 得到
#[derive(Clone, PartialEq, Eq)]
pub struct EndpointConfig {
    base_url: String,
    api_key: Option<String>,
    models: Vec<ModelInfo>,
}

impl EndpointConfig {
    /// 目录为空时返回 None；base_url 去除末尾斜杠
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        models: Vec<ModelInfo>,
    ) -> Option<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.trim().is_empty() || models.is_empty() {
            return None;
        }
        Some(Self {
            base_url,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            models,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// 模型目录（按配置顺序）
    pub fn models(&self) -> &[ModelInfo] {
        &self.models
    }

    /// chat/completions 端点的完整 URL
    pub fn chat_completions_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }
}

impl fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("models", &self.models)
            .finish()
    }
}

/// 单次调用参数（一次性使用）
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CallParams {
    pub prompt: String,
    #[serde(default)]
    pub system: Option<String>,
    /// 模型提示：精确 id、子串或「fast / coder / long」之类的自然语言
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default, alias = "maxTokens")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f64>,
}

impl CallParams {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_model(mut self, hint: impl Into<String>) -> Self {
        self.model = Some(hint.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

/// 服务端返回的 token 使用统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// 成功调用的结果
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub text: String,
    /// 实际使用的模型 id（可能与调用方的 hint 不同）
    pub model: String,
    pub usage: Option<Usage>,
}

/// 调用结果：成功与失败二选一，不存在部分结果
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallResult {
    Success {
        text: String,
        model: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
    },
    Failure {
        kind: FailureKind,
        error: String,
    },
}

impl CallResult {
    pub fn is_success(&self) -> bool {
        matches!(self, CallResult::Success { .. })
    }

}

impl From<Completion> for CallResult {
    fn from(c: Completion) -> Self {
        CallResult::Success {
            text: c.text,
            model: c.model,
            usage: c.usage,
        }
    }
}

impl From<CallError> for CallResult {
    fn from(e: CallError) -> Self {
        CallResult::Failure {
            kind: e.kind(),
            error: e.to_string(),
        }
    }
}

impl From<Result<Completion, CallError>> for CallResult {
    fn from(r: Result<Completion, CallError>) -> Self {
        match r {
            Ok(c) => c.into(),
            Err(e) => e.into(),
        }
    }
}

/// 消息角色（仅 system / user 会出现在请求中）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// 线上消息格式
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// POST {base_url}/chat/completions 的请求体
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
    pub temperature: f64,
}
