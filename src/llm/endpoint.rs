//! Config Resolver：把宿主的原始 provider 配置变成已校验的 EndpointConfig
//!
//! 无状态、不报错：任何不可用的配置都折叠为 None，调用方据此视为「本地卸载功能不可用」。

use std::collections::HashSet;

use crate::config::{AppConfig, RawModelEntry, RawProviderConfig};
use crate::llm::types::{EndpointConfig, ModelInfo, DEFAULT_MAX_TOKENS};

/// 解析原始配置：缺 base_url、provider 未配置或过滤后没有可用模型时返回 None
pub fn resolve_endpoint(raw: Option<&RawProviderConfig>) -> Option<EndpointConfig> {
    let raw = raw?;
    let base_url = raw.base_url.as_deref()?;

    let mut seen = HashSet::new();
    let models: Vec<ModelInfo> = raw
        .models
        .iter()
        .filter_map(resolve_model)
        .filter(|m| {
            let fresh = seen.insert(m.id.clone());
            if !fresh {
                tracing::debug!(model = %m.id, "duplicate model id dropped");
            }
            fresh
        })
        .collect();

    let endpoint = EndpointConfig::new(base_url, raw.api_key.clone(), models);
    if endpoint.is_none() {
        tracing::debug!("local provider has no base URL or no usable models");
    }
    endpoint
}

/// 从整份应用配置解析 [llm.local]
pub fn resolve_from_app_config(cfg: &AppConfig) -> Option<EndpointConfig> {
    resolve_endpoint(cfg.llm.local.as_ref())
}

/// 单个模型条目：id 非空且 context_window > 0 才保留；name 缺省为 id，max_tokens 缺省或非正时为 4096
fn resolve_model(entry: &RawModelEntry) -> Option<ModelInfo> {
    let id = match entry.id.as_deref() {
        Some(id) if !id.is_empty() => id,
        _ => {
            tracing::debug!("model entry without id dropped");
            return None;
        }
    };

    let context_window = match entry.context_window {
        Some(cw) if cw > 0 => clamp_u32(cw),
        other => {
            tracing::debug!(model = %id, context_window = ?other, "model entry without positive context window dropped");
            return None;
        }
    };

    let name = entry
        .name
        .as_deref()
        .filter(|n| !n.is_empty())
        .unwrap_or(id);

    let max_tokens = entry
        .max_tokens
        .filter(|&t| t > 0)
        .map(clamp_u32)
        .unwrap_or(DEFAULT_MAX_TOKENS);

    Some(
        ModelInfo::new(id, context_window)
            .with_name(name)
            .with_max_tokens(max_tokens),
    )
}

fn clamp_u32(v: i64) -> u32 {
    u32::try_from(v).unwrap_or(u32::MAX)
}
