//! 本地 OpenAI 兼容端点的请求执行器
//!
//! 每次调用：选模型 → 收紧 max_tokens → 组装消息 → 预算检查 → 在超时内 POST {base_url}/chat/completions。
//! 所有失败都在这里归类为 CallError，再在公开边界转为 CallResult；不做任何自动重试。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::core::CallError;
use crate::llm::endpoint::resolve_from_app_config;
use crate::llm::selector::{select_from, MatchKind};
use crate::llm::token_budget::{TokenBudget, TokenEstimator};
use crate::llm::types::{
    CallParams, CallResult, ChatCompletionRequest, ChatMessage, Completion, EndpointConfig,
    ModelInfo, Usage, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
};
use crate::llm::LlmClient;

/// 单次请求的默认超时
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// 预检通过、可直接发送的请求
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub model: ModelInfo,
    pub matched: MatchKind,
    pub body: ChatCompletionRequest,
    pub estimated_tokens: usize,
    pub budget: TokenBudget,
}

/// 本地 LLM 客户端：持有 reqwest Client、端点与超时；自身不保存调用间状态
pub struct LocalLlmClient {
    http: Client,
    endpoint: EndpointConfig,
    timeout: Duration,
}

impl LocalLlmClient {
    pub fn new(endpoint: EndpointConfig) -> Self {
        Self {
            http: Client::builder().build().unwrap_or_default(),
            endpoint,
            timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    /// 从应用配置构建；[llm.local] 不可用时返回 None
    pub fn from_app_config(cfg: &AppConfig) -> Option<Self> {
        let endpoint = resolve_from_app_config(cfg)?;
        let client = Self::new(endpoint);
        Some(match cfg.llm.request_timeout_secs {
            0 => client,
            secs => client.with_timeout(Duration::from_secs(secs)),
        })
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &EndpointConfig {
        &self.endpoint
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 发送前的全部本地步骤（无 I/O）：选模型、收紧 max_tokens、组装消息、预算检查、构造请求体
    pub fn prepare(&self, params: &CallParams) -> Result<PreparedRequest, CallError> {
        if params.prompt.trim().is_empty() {
            return Err(CallError::EmptyPrompt);
        }

        let (model, matched) = select_from(self.endpoint.models(), params.model.as_deref())
            .ok_or(CallError::NoMatchingModel)?;
        tracing::debug!(hint = ?params.model, model = %model.id, matched = ?matched, "model selected");

        let max_tokens = effective_max_tokens(params.max_tokens, model);
        let messages = build_messages(params.system.as_deref(), &params.prompt);

        let estimated_tokens = TokenEstimator::estimate_messages(&messages);
        let budget = TokenBudget::new(model.context_window, max_tokens);
        if !budget.allows(estimated_tokens) {
            return Err(CallError::PromptTooLarge {
                model: model.id.clone(),
                estimated: estimated_tokens,
                budget: budget.prompt_budget(),
                context_window: budget.context_window(),
                max_tokens: budget.reserved_for_response(),
            });
        }

        let body = ChatCompletionRequest {
            model: model.id.clone(),
            messages,
            max_tokens,
            temperature: params.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        };

        Ok(PreparedRequest {
            model: model.clone(),
            matched,
            body,
            estimated_tokens,
            budget,
        })
    }

    /// 执行一次调用，返回 Result 供内部以 `?` 组合
    pub async fn try_complete(&self, params: &CallParams) -> Result<Completion, CallError> {
        self.try_complete_with_cancel(params, &CancellationToken::new())
            .await
    }

    /// 同 try_complete，cancel 被触发时中止在途请求并返回 Cancelled
    pub async fn try_complete_with_cancel(
        &self,
        params: &CallParams,
        cancel: &CancellationToken,
    ) -> Result<Completion, CallError> {
        let result = self.run(params, cancel).await;
        match &result {
            Err(e) if e.is_local_rejection() => {
                tracing::debug!(kind = ?e.kind(), error = %e, "local llm call rejected before sending");
            }
            Err(e) => tracing::warn!(kind = ?e.kind(), error = %e, "local llm call failed"),
            Ok(_) => {}
        }
        result
    }

    /// 执行一次调用，所有失败都转为 CallResult::Failure
    pub async fn complete_with_cancel(
        &self,
        params: &CallParams,
        cancel: &CancellationToken,
    ) -> CallResult {
        self.try_complete_with_cancel(params, cancel).await.into()
    }

    async fn run(
        &self,
        params: &CallParams,
        cancel: &CancellationToken,
    ) -> Result<Completion, CallError> {
        let prepared = self.prepare(params)?;
        tracing::info!(
            model = %prepared.model.id,
            max_tokens = prepared.body.max_tokens,
            estimated_tokens = prepared.estimated_tokens,
            budget = prepared.budget.prompt_budget(),
            "dispatching local llm request"
        );

        let start = Instant::now();
        // 计时器归 timeout future 所有：请求先完成、出错或被取消时随之 drop，超时则 drop 在途请求
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallError::Cancelled),
            r = timeout(self.timeout, self.send(&prepared)) => match r {
                Ok(r) => r,
                Err(_) => Err(CallError::Timeout { elapsed: self.timeout }),
            },
        };
        let completion = outcome?;

        tracing::info!(
            model = %completion.model,
            duration_ms = start.elapsed().as_millis() as u64,
            usage = ?completion.usage,
            "local llm request completed"
        );
        Ok(completion)
    }

    async fn send(&self, prepared: &PreparedRequest) -> Result<Completion, CallError> {
        let mut request = self
            .http
            .post(self.endpoint.chat_completions_url())
            .json(&prepared.body);
        if let Some(key) = self.endpoint.api_key() {
            request = request.bearer_auth(key);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| self.classify_transport(&e))?;

        let status = resp.status();
        if !status.is_success() {
            // 读取错误响应体失败时不叠加新错误
            let body = resp.text().await.unwrap_or_default();
            return Err(CallError::http(status.as_u16(), &body));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| self.classify_transport(&e))?;
        Ok(parse_completion(&body, &prepared.model.id))
    }

    /// 传输层错误归类：超时 / 连接失败（服务未启动）/ 其它
    fn classify_transport(&self, err: &reqwest::Error) -> CallError {
        let reason = error_chain(err);
        if err.is_timeout() {
            CallError::Timeout {
                elapsed: self.timeout,
            }
        } else if err.is_connect() || is_connection_refused(err, &reason) {
            CallError::Unreachable {
                base_url: self.endpoint.base_url().to_string(),
                reason,
            }
        } else {
            CallError::UnknownFailure(reason)
        }
    }
}

#[async_trait]
impl LlmClient for LocalLlmClient {
    async fn complete(&self, params: &CallParams) -> CallResult {
        self.try_complete(params).await.into()
    }

    fn models(&self) -> &[ModelInfo] {
        self.endpoint.models()
    }
}

/// 对给定端点执行一次调用（默认超时）
pub async fn execute(config: &EndpointConfig, params: CallParams) -> CallResult {
    LocalLlmClient::new(config.clone()).complete(&params).await
}

/// 从应用配置解析端点并执行；未配置时返回 ConfigAbsent
pub async fn call_local_llm(cfg: &AppConfig, params: CallParams) -> CallResult {
    match LocalLlmClient::from_app_config(cfg) {
        Some(client) => client.complete(&params).await,
        None => CallError::ConfigAbsent.into(),
    }
}

/// min(请求值或 4096, 模型上限)；请求值 0 视为未指定
pub fn effective_max_tokens(requested: Option<u32>, model: &ModelInfo) -> u32 {
    requested
        .filter(|&t| t > 0)
        .unwrap_or(DEFAULT_MAX_TOKENS)
        .min(model.max_tokens)
}

/// 可选 system（trim 后非空才加入）+ 一条原样的 user 消息
pub fn build_messages(system: Option<&str>, prompt: &str) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system.filter(|s| !s.trim().is_empty()) {
        messages.push(ChatMessage::system(system));
    }
    messages.push(ChatMessage::user(prompt));
    messages
}

/// 宽松解析：choices[0].message.content 缺失或响应非 JSON 时返回空文本；usage 仅在为对象时返回
fn parse_completion(body: &str, model_id: &str) -> Completion {
    let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);

    let text = match value
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
    {
        Some(text) => text.to_string(),
        None => {
            tracing::warn!(model = %model_id, "response has no choices[0].message.content, returning empty text");
            String::new()
        }
    };

    // 逐字段读取：单个计数为 null 或类型不对时记 0，不影响其它计数
    let usage = value.get("usage").filter(|u| u.is_object()).map(|u| {
        let count = |key: &str| u.get(key).and_then(Value::as_u64).unwrap_or(0);
        Usage {
            prompt_tokens: count("prompt_tokens"),
            completion_tokens: count("completion_tokens"),
            total_tokens: count("total_tokens"),
        }
    });

    Completion {
        text,
        model: model_id.to_string(),
        usage,
    }
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut parts = vec![err.to_string()];
    let mut source = err.source();
    while let Some(e) = source {
        let s = e.to_string();
        if !parts.iter().any(|p| p.contains(&s)) {
            parts.push(s);
        }
        source = e.source();
    }
    parts.join(": ")
}

fn is_connection_refused(err: &(dyn std::error::Error + 'static), chain: &str) -> bool {
    let lower = chain.to_lowercase();
    if lower.contains("connection refused") || lower.contains("econnrefused") {
        return true;
    }
    let mut source = err.source();
    while let Some(e) = source {
        if let Some(io) = e.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = e.source();
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FailureKind;
    use crate::llm::types::Role;

    fn endpoint() -> EndpointConfig {
        EndpointConfig::new(
            "http://127.0.0.1:8000/v1/",
            None,
            vec![
                ModelInfo::new("qwen2.5-coder-7b", 32768).with_max_tokens(8192),
                ModelInfo::new("llama-3.2-3b", 8192).with_max_tokens(2048),
                ModelInfo::new("tiny", 1000).with_max_tokens(500),
            ],
        )
        .unwrap()
    }

    fn client() -> LocalLlmClient {
        LocalLlmClient::new(endpoint())
    }

    #[test]
    fn test_effective_max_tokens_is_clamped() {
        let model = ModelInfo::new("m", 8192).with_max_tokens(2048);
        assert_eq!(effective_max_tokens(None, &model), 2048);
        assert_eq!(effective_max_tokens(Some(100_000), &model), 2048);
        assert_eq!(effective_max_tokens(Some(512), &model), 512);
        assert_eq!(effective_max_tokens(Some(0), &model), 2048);

        let big = ModelInfo::new("m", 65536).with_max_tokens(16384);
        assert_eq!(effective_max_tokens(None, &big), DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn test_build_messages_skips_blank_system() {
        let messages = build_messages(Some("   "), "hello");
        assert_eq!(messages, vec![ChatMessage::user("hello")]);

        let messages = build_messages(Some("be terse"), "  hello  ");
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "  hello  ");
    }

    #[test]
    fn test_prepare_builds_payload() {
        let params = CallParams::new("summarize this")
            .with_system("You are concise.")
            .with_model("3b")
            .with_max_tokens(10_000);
        let prepared = client().prepare(&params).unwrap();

        assert_eq!(prepared.body.model, "llama-3.2-3b");
        assert_eq!(prepared.body.max_tokens, 2048);
        assert_eq!(prepared.body.temperature, DEFAULT_TEMPERATURE);
        assert_eq!(prepared.body.messages.len(), 2);
        assert_eq!(prepared.budget.prompt_budget(), 8192 - 2048);
    }

    #[test]
    fn test_prepare_rejects_empty_prompt() {
        let err = client().prepare(&CallParams::new("  \n")).unwrap_err();
        assert!(matches!(err, CallError::EmptyPrompt));
    }

    #[test]
    fn test_prepare_rejects_prompt_over_budget() {
        // tiny: 1000 - 500 = 500 token 预算，2004 字符 = 501 token
        let params = CallParams::new("x".repeat(2004)).with_model("tiny");
        match client().prepare(&params).unwrap_err() {
            CallError::PromptTooLarge {
                model,
                estimated,
                budget,
                ..
            } => {
                assert_eq!(model, "tiny");
                assert_eq!(estimated, 501);
                assert_eq!(budget, 500);
            }
            other => panic!("Expected PromptTooLarge, got {other:?}"),
        }

        let params = CallParams::new("x".repeat(2000)).with_model("tiny");
        assert!(client().prepare(&params).is_ok());
    }

    #[test]
    fn test_budget_counts_system_message() {
        // 1990 + 1 (换行) + 9 = 2000 字符 = 500 token，恰好在预算内
        let params = CallParams::new("x".repeat(1990))
            .with_system("y".repeat(9))
            .with_model("tiny");
        assert!(client().prepare(&params).is_ok());

        let params = CallParams::new("x".repeat(1990))
            .with_system("y".repeat(10))
            .with_model("tiny");
        assert!(matches!(
            client().prepare(&params).unwrap_err(),
            CallError::PromptTooLarge { .. }
        ));
    }

    #[test]
    fn test_parse_completion_success() {
        let body = r#"{
            "choices": [{"index": 0, "message": {"role": "assistant", "content": "done"}}],
            "usage": {"prompt_tokens": 9, "completion_tokens": 3, "total_tokens": 12}
        }"#;
        let c = parse_completion(body, "m");
        assert_eq!(c.text, "done");
        assert_eq!(c.model, "m");
        assert_eq!(
            c.usage,
            Some(Usage {
                prompt_tokens: 9,
                completion_tokens: 3,
                total_tokens: 12
            })
        );
    }

    #[test]
    fn test_parse_completion_is_lenient() {
        let c = parse_completion("not json", "m");
        assert_eq!(c.text, "");
        assert!(c.usage.is_none());

        let c = parse_completion(r#"{"choices": []}"#, "m");
        assert_eq!(c.text, "");

        let c = parse_completion(r#"{"choices": [{"message": {"content": null}}], "usage": {"total_tokens": 5}}"#, "m");
        assert_eq!(c.text, "");
        assert_eq!(c.usage.unwrap().total_tokens, 5);
    }

    #[test]
    fn test_parse_completion_keeps_counters_next_to_null() {
        let body = r#"{
            "choices": [{"message": {"content": "x"}}],
            "usage": {"prompt_tokens": null, "completion_tokens": 3, "total_tokens": 3}
        }"#;
        let usage = parse_completion(body, "m").usage.unwrap();
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.completion_tokens, 3);
        assert_eq!(usage.total_tokens, 3);
    }

    #[test]
    fn test_prepare_sends_caller_temperature() {
        let params = CallParams::new("hi").with_temperature(0.2);
        let prepared = client().prepare(&params).unwrap();
        assert_eq!(prepared.body.temperature, 0.2);
        assert_eq!(
            serde_json::to_value(&prepared.body).unwrap()["temperature"],
            serde_json::json!(0.2)
        );
    }

    #[test]
    fn test_reserve_larger_than_window_rejects_any_prompt() {
        let ep = EndpointConfig::new("http://h", None, vec![ModelInfo::new("small-ctx", 100)]).unwrap();
        match LocalLlmClient::new(ep).prepare(&CallParams::new("hi")).unwrap_err() {
            CallError::PromptTooLarge {
                budget,
                context_window,
                max_tokens,
                ..
            } => {
                assert_eq!(budget, -3996);
                assert_eq!(context_window, 100);
                assert_eq!(max_tokens, 4096);
            }
            other => panic!("Expected PromptTooLarge, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_local_rejection_becomes_failure_variant() {
        let params = CallParams::new("x".repeat(10_000)).with_model("tiny");
        match client().complete(&params).await {
            CallResult::Failure { kind, error } => {
                assert_eq!(kind, FailureKind::PromptTooLarge);
                assert!(error.contains("smaller pieces"));
            }
            other => panic!("Expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_from_app_config_applies_timeout() {
        let mut cfg = AppConfig::default();
        cfg.llm.local = Some(
            crate::config::RawProviderConfig::from_json(&serde_json::json!({
                "baseUrl": "http://h:8000/v1/",
                "models": [{ "id": "m", "contextWindow": 8192 }]
            }))
            .unwrap(),
        );
        cfg.llm.request_timeout_secs = 5;
        let c = LocalLlmClient::from_app_config(&cfg).unwrap();
        assert_eq!(c.timeout(), Duration::from_secs(5));
        assert_eq!(c.endpoint().base_url(), "http://h:8000/v1");

        cfg.llm.request_timeout_secs = 0;
        let c = LocalLlmClient::from_app_config(&cfg).unwrap();
        assert_eq!(c.timeout(), DEFAULT_REQUEST_TIMEOUT);
    }

    #[tokio::test]
    async fn test_call_local_llm_without_config() {
        let result = call_local_llm(&AppConfig::default(), CallParams::new("hi")).await;
        match result {
            CallResult::Failure { kind, .. } => assert_eq!(kind, FailureKind::ConfigAbsent),
            other => panic!("Expected ConfigAbsent, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_send() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = client()
            .try_complete_with_cancel(&CallParams::new("hi"), &cancel)
            .await;
        assert!(matches!(result, Err(CallError::Cancelled)));
    }
}
