//! Local LLM - 命令行入口
//!
//! 用法：
//!   local-llm models
//!   local-llm [--config PATH] [--model HINT] [--system TEXT] [--max-tokens N] [--temperature T] [--json] <prompt...>

use std::path::PathBuf;

use anyhow::{bail, Context};
use local_llm::config::{load_config, AppConfig};
use local_llm::{CallParams, CallResult, LlmClient, LocalLlmClient};

const USAGE: &str = "Usage:
  local-llm models
  local-llm [--config PATH] [--model HINT] [--system TEXT] [--max-tokens N] [--temperature T] [--json] <prompt...>";

/// 解析后的命令行参数
#[derive(Debug, Default)]
struct Cli {
    config_path: Option<PathBuf>,
    list_models: bool,
    json: bool,
    params: CallParams,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> anyhow::Result<Cli> {
    let mut cli = Cli::default();
    let mut prompt_parts: Vec<String> = Vec::new();
    let mut args = args.into_iter();

    while let Some(arg) = args.next() {
        let mut value = |flag: &str| {
            args.next()
                .with_context(|| format!("{} requires a value", flag))
        };
        match arg.as_str() {
            "--config" => cli.config_path = Some(PathBuf::from(value("--config")?)),
            "--model" => cli.params.model = Some(value("--model")?),
            "--system" => cli.params.system = Some(value("--system")?),
            "--max-tokens" => {
                let v = value("--max-tokens")?;
                cli.params.max_tokens =
                    Some(v.parse::<u32>().with_context(|| format!("invalid --max-tokens: {}", v))?);
            }
            "--temperature" => {
                let v = value("--temperature")?;
                cli.params.temperature =
                    Some(v.parse::<f64>().with_context(|| format!("invalid --temperature: {}", v))?);
            }
            "--json" => cli.json = true,
            "-h" | "--help" => bail!("{}", USAGE),
            "models" if prompt_parts.is_empty() => cli.list_models = true,
            s if s.starts_with("--") => bail!("unknown option {}\n{}", s, USAGE),
            other => prompt_parts.push(other.to_string()),
        }
    }

    cli.params.prompt = prompt_parts.join(" ");
    if !cli.list_models && cli.params.prompt.trim().is_empty() {
        bail!("missing prompt\n{}", USAGE);
    }
    Ok(cli)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    local_llm::observability::init();

    let cli = parse_args(std::env::args().skip(1))?;

    let cfg = load_config(cli.config_path.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    let Some(client) = LocalLlmClient::from_app_config(&cfg) else {
        eprintln!("Local LLM is not configured: set [llm.local] base_url and at least one model with context_window > 0");
        std::process::exit(2);
    };

    tracing::debug!(
        base_url = %client.endpoint().base_url(),
        timeout = ?client.timeout(),
        "local llm endpoint resolved"
    );

    if cli.list_models {
        for m in client.models() {
            println!(
                "{}\t{}\tcontext={}\tmax_tokens={}",
                m.id, m.name, m.context_window, m.max_tokens
            );
        }
        return Ok(());
    }

    let result = client.complete(&cli.params).await;
    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize result")?
        );
    }
    match result {
        CallResult::Success { text, .. } => {
            if !cli.json {
                println!("{}", text);
            }
            Ok(())
        }
        CallResult::Failure { error, .. } => {
            if !cli.json {
                eprintln!("{}", error);
            }
            std::process::exit(1);
        }
    }
}
