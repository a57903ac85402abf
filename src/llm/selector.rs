//! 模型选择器
//!
//! 根据调用方给出的自由文本 hint 在目录中挑选模型，按优先级依次尝试：
//! - 无 hint：目录第一项
//! - id 精确匹配（忽略大小写）
//! - id 或 name 子串匹配
//! - 别名关键词匹配（coder / fast / long）
//! - 兜底：目录第一项
//!
//! 纯函数、无状态，可并发调用。

use crate::llm::types::{EndpointConfig, ModelInfo};

/// 别名类别 -> 关键词；有序列表，类别的声明顺序决定 hint 同时命中多个类别时的结果
pub const MODEL_ALIASES: &[(&str, &[&str])] = &[
    ("coder", &["coder", "code", "coding"]),
    ("fast", &["3b", "fast", "small", "light"]),
    ("long", &["long", "llama-3.1", "64k", "65k"]),
];

/// 命中路径（用于日志与测试）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    Default,
    ExactId,
    Substring,
    Alias(&'static str),
    Fallback,
}

/// 选择模型；目录非空时必定返回 Some
pub fn select_model<'a>(config: &'a EndpointConfig, hint: Option<&str>) -> Option<&'a ModelInfo> {
    select_from(config.models(), hint).map(|(model, _)| model)
}

/// 在任意目录切片上选择，返回命中的模型与命中路径
pub fn select_from<'a>(
    models: &'a [ModelInfo],
    hint: Option<&str>,
) -> Option<(&'a ModelInfo, MatchKind)> {
    let first = models.first()?;

    let hint = match hint {
        Some(h) => h.to_lowercase(),
        None => return Some((first, MatchKind::Default)),
    };

    if let Some(m) = models.iter().find(|m| m.id.to_lowercase() == hint) {
        return Some((m, MatchKind::ExactId));
    }

    if let Some(m) = models
        .iter()
        .find(|m| m.id.to_lowercase().contains(&hint) || m.name.to_lowercase().contains(&hint))
    {
        return Some((m, MatchKind::Substring));
    }

    if let Some((m, category)) = match_alias(models, &hint) {
        return Some((m, MatchKind::Alias(category)));
    }

    Some((first, MatchKind::Fallback))
}

/// 按类别声明顺序：hint 含该类别任一关键词时，在目录中找 "id name" 也含该类别关键词的第一项
fn match_alias<'a>(models: &'a [ModelInfo], hint: &str) -> Option<(&'a ModelInfo, &'static str)> {
    for (category, keywords) in MODEL_ALIASES {
        if !keywords.iter().any(|k| hint.contains(k)) {
            continue;
        }
        let hit = models.iter().find(|m| {
            let haystack = format!("{} {}", m.id, m.name).to_lowercase();
            keywords.iter().any(|k| haystack.contains(k))
        });
        if let Some(m) = hit {
            return Some((m, *category));
        }
    }
    None
}
