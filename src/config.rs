//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `LOCAL_LLM__*` 覆盖（双下划线表示嵌套，如 `LOCAL_LLM__LLM__LOCAL__BASE_URL=http://127.0.0.1:8000/v1`）。
//!
//! 这里只负责把宿主配置读成「松散类型」的原始结构；校验与规范化由 `llm::endpoint::resolve_endpoint` 完成。

use std::path::PathBuf;

use serde::{Deserialize, Deserializer};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSection,
}

/// [llm] 段：本地 provider 与请求超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// [llm.local]：未配置时整个本地卸载功能不可用
    #[serde(default)]
    pub local: Option<RawProviderConfig>,
    /// 单次请求超时（秒）
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            local: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    120
}

/// [llm.local] 段：宿主提供的原始 provider 配置，字段均可缺失
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawProviderConfig {
    #[serde(default, alias = "baseUrl")]
    pub base_url: Option<String>,
    #[serde(default, alias = "apiKey")]
    pub api_key: Option<String>,
    #[serde(default)]
    pub models: Vec<RawModelEntry>,
}

impl RawProviderConfig {
    /// 从 JSON 形式的宿主配置解析（接受 camelCase 字段名）
    pub fn from_json(value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        Self::deserialize(value)
    }
}

/// [[llm.local.models]]：单个模型描述，数值字段宽松解析
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawModelEntry {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "contextWindow", deserialize_with = "lenient_i64")]
    pub context_window: Option<i64>,
    #[serde(default, alias = "maxTokens", deserialize_with = "lenient_i64")]
    pub max_tokens: Option<i64>,
}

/// 接受整数、浮点（截断）与数字字符串；其它值视为缺失，不让单个坏条目拖垮整份配置
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        serde_json::Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        serde_json::Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().map(|f| f as i64))
        }
        _ => None,
    }))
}

/// 从 config 目录加载配置，环境变量 LOCAL_LLM__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 LOCAL_LLM__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, skipping");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("LOCAL_LLM")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_default_config_has_no_provider() {
        let cfg = AppConfig::default();
        assert!(cfg.llm.local.is_none());
        assert_eq!(cfg.llm.request_timeout_secs, 120);
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
[llm]
request_timeout_secs = 30

[llm.local]
base_url = "http://127.0.0.1:8000/v1/"

[[llm.local.models]]
id = "qwen2.5-coder-7b"
context_window = 32768

[[llm.local.models]]
id = "llama-3.2-3b"
name = "Llama 3B"
context_window = 8192
max_tokens = 2048
"#
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.llm.request_timeout_secs, 30);
        let local = cfg.llm.local.unwrap();
        assert_eq!(local.base_url.as_deref(), Some("http://127.0.0.1:8000/v1/"));
        assert_eq!(local.models.len(), 2);
        assert_eq!(local.models[0].context_window, Some(32768));
        assert_eq!(local.models[0].max_tokens, None);
        assert_eq!(local.models[1].name.as_deref(), Some("Llama 3B"));
    }

    #[test]
    fn test_from_json_accepts_camel_case_and_loose_numbers() {
        let raw = RawProviderConfig::from_json(&json!({
            "baseUrl": "http://h:8000/v1",
            "apiKey": "secret",
            "models": [
                { "id": "a", "contextWindow": "4096", "maxTokens": 1024.0 },
                { "id": "b", "contextWindow": true },
                { "id": "c" }
            ]
        }))
        .unwrap();

        assert_eq!(raw.base_url.as_deref(), Some("http://h:8000/v1"));
        assert_eq!(raw.api_key.as_deref(), Some("secret"));
        assert_eq!(raw.models[0].context_window, Some(4096));
        assert_eq!(raw.models[0].max_tokens, Some(1024));
        assert_eq!(raw.models[1].context_window, None);
        assert_eq!(raw.models[2].context_window, None);
    }
}
