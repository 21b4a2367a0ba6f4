// Per-source model list parsers. Each parser turns a raw response body
// from one upstream shape into normalized `ModelInfo`s.

// Pattern literals below are fixed at compile time; a failed `Regex::new`
// here is a programming error, not a runtime condition to propagate.
#![allow(clippy::expect_used)]

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

use crate::error::{CortexError, CortexResult};
use crate::registry::ModelInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceParser {
    OpenAi,
    Ollama,
    CodexPreset,
    GeminiCli,
    MistralVibe,
    OpenCode,
}

impl SourceParser {
    pub fn name(&self) -> &'static str {
        match self {
            SourceParser::OpenAi => "openai",
            SourceParser::Ollama => "ollama",
            SourceParser::CodexPreset => "codex_preset",
            SourceParser::GeminiCli => "gemini_cli",
            SourceParser::MistralVibe => "mistral_vibe",
            SourceParser::OpenCode => "opencode",
        }
    }

    pub fn parse(&self, body: &str) -> CortexResult<Vec<ModelInfo>> {
        match self {
            SourceParser::OpenAi => parse_openai(body),
            SourceParser::Ollama => parse_ollama(body),
            SourceParser::CodexPreset => parse_codex_preset(body),
            SourceParser::GeminiCli => parse_gemini_cli(body),
            SourceParser::MistralVibe => parse_mistral_vibe(body),
            SourceParser::OpenCode => parse_opencode(body),
        }
    }
}

pub type ParsedSource = (String, Vec<ModelInfo>);

fn bare_model(id: &str) -> ModelInfo {
    ModelInfo {
        id: id.to_string(),
        object: "model".to_string(),
        created: 0,
        owned_by: "unknown".to_string(),
        model_type: "model".to_string(),
        display_name: id.to_string(),
        version: String::new(),
        description: String::new(),
        input_token_limit: 0,
        output_token_limit: 0,
        context_length: 0,
        max_completion_tokens: 0,
        supported_parameters: Vec::new(),
        thinking: None,
    }
}

#[derive(Deserialize)]
struct OpenAiListResponse {
    data: Vec<OpenAiModel>,
}

#[derive(Deserialize)]
struct OpenAiModel {
    id: String,
    #[serde(default)]
    created: i64,
    #[serde(default, rename = "owned_by")]
    owned_by: String,
}

fn parse_openai(body: &str) -> CortexResult<Vec<ModelInfo>> {
    let parsed: OpenAiListResponse =
        serde_json::from_str(body).map_err(|e| CortexError::invalid_input(format!("openai models parse: {e}")))?;
    Ok(parsed
        .data
        .into_iter()
        .map(|m| ModelInfo {
            created: m.created,
            owned_by: if m.owned_by.is_empty() { "openai".to_string() } else { m.owned_by },
            ..bare_model(&m.id)
        })
        .collect())
}

#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
    #[serde(default)]
    size: u64,
}

fn parse_ollama(body: &str) -> CortexResult<Vec<ModelInfo>> {
    let parsed: OllamaTagsResponse =
        serde_json::from_str(body).map_err(|e| CortexError::invalid_input(format!("ollama tags parse: {e}")))?;
    Ok(parsed
        .models
        .into_iter()
        .map(|m| ModelInfo {
            owned_by: "ollama".to_string(),
            description: format!("{} bytes on disk", m.size),
            ..bare_model(&m.name)
        })
        .collect())
}

fn codex_preset_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"id:\s*"([^"]+)"[^}]*show_in_picker:\s*true"#).expect("static regex is valid")
    })
}

fn parse_codex_preset(body: &str) -> CortexResult<Vec<ModelInfo>> {
    Ok(codex_preset_regex()
        .captures_iter(body)
        .map(|c| {
            let id = c.get(1).map(|m| m.as_str()).unwrap_or_default();
            ModelInfo {
                owned_by: "codex".to_string(),
                ..bare_model(id)
            }
        })
        .collect())
}

fn gemini_const_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"const\s+(\w+)\s*=\s*'([^']+)'"#).expect("static regex is valid"))
}

fn gemini_set_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"new\s+Set\(\s*\[([^\]]*)\]\s*\)").expect("static regex is valid"))
}

/// Two-pass parse: collect `const NAME = 'value'` bindings, then resolve
/// the identifiers referenced inside a `new Set([...])` literal against
/// that table.
fn parse_gemini_cli(body: &str) -> CortexResult<Vec<ModelInfo>> {
    let mut bindings = std::collections::HashMap::new();
    for caps in gemini_const_regex().captures_iter(body) {
        bindings.insert(caps[1].to_string(), caps[2].to_string());
    }

    let Some(set_caps) = gemini_set_regex().captures(body) else {
        return Ok(Vec::new());
    };
    let members = set_caps[1].to_string();
    let models = members
        .split(',')
        .map(|m| m.trim())
        .filter(|m| !m.is_empty())
        .filter_map(|ident| bindings.get(ident).cloned())
        .map(|id| ModelInfo {
            owned_by: "google".to_string(),
            ..bare_model(&id)
        })
        .collect();
    Ok(models)
}

fn mistral_vibe_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"ModelConfig\(name="([^"]+)",\s*alias="([^"]+)"\)"#).expect("static regex is valid")
    })
}

fn parse_mistral_vibe(body: &str) -> CortexResult<Vec<ModelInfo>> {
    Ok(mistral_vibe_regex()
        .captures_iter(body)
        .map(|c| ModelInfo {
            owned_by: "mistral".to_string(),
            display_name: c[2].to_string(),
            ..bare_model(&c[1])
        })
        .collect())
}

#[derive(Deserialize)]
struct OpenCodeAgentResponse {
    #[serde(default)]
    models: Vec<String>,
}

/// Parses the `/agent` endpoint shape; callers fall back to a static list
/// of known OpenCode models when the endpoint is unreachable (handled by
/// the discovery loop's grace-period fallback, not here).
fn parse_opencode(body: &str) -> CortexResult<Vec<ModelInfo>> {
    let parsed: OpenCodeAgentResponse = serde_json::from_str(body).unwrap_or(OpenCodeAgentResponse { models: Vec::new() });
    if parsed.models.is_empty() {
        return Ok(static_opencode_fallback());
    }
    Ok(parsed
        .models
        .into_iter()
        .map(|id| ModelInfo {
            owned_by: "opencode".to_string(),
            ..bare_model(&id)
        })
        .collect())
}

fn static_opencode_fallback() -> Vec<ModelInfo> {
    vec![bare_model("opencode/default")]
}

/// Claude's upstream catalog source is closed; this static list is the
/// entirety of its "discovery".
pub fn static_claude_models() -> Vec<ModelInfo> {
    [
        ("claude-opus-4", "Claude Opus 4"),
        ("claude-sonnet-4", "Claude Sonnet 4"),
        ("claude-haiku-4", "Claude Haiku 4"),
    ]
    .into_iter()
    .map(|(id, display)| ModelInfo {
        owned_by: "anthropic".to_string(),
        display_name: display.to_string(),
        context_length: 200_000,
        input_token_limit: 200_000,
        output_token_limit: 8_192,
        max_completion_tokens: 8_192,
        ..bare_model(id)
    })
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_openai_style_list() {
        let body = r#"{"data":[{"id":"gpt-4o","created":111,"owned_by":"openai"}]}"#;
        let models = parse_openai(body).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "gpt-4o");
    }

    #[test]
    fn parses_ollama_tags() {
        let body = r#"{"models":[{"name":"qwen2.5:0.5b","size":500}]}"#;
        let models = parse_ollama(body).unwrap();
        assert_eq!(models[0].id, "qwen2.5:0.5b");
    }

    #[test]
    fn parses_codex_presets_only_when_shown_in_picker() {
        let body = r#"ModelPreset{ id: "gpt-5-codex", show_in_picker: true }, ModelPreset{ id: "hidden", show_in_picker: false }"#;
        let models = parse_codex_preset(body).unwrap();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].id, "gpt-5-codex");
    }

    #[test]
    fn parses_gemini_cli_two_pass_constants() {
        let body = r#"
            const GEMINI_PRO = 'gemini-2.5-pro';
            const GEMINI_FLASH = 'gemini-2.5-flash';
            const UNUSED = 'unused-model';
            const ALL = new Set([GEMINI_PRO, GEMINI_FLASH]);
        "#;
        let models = parse_gemini_cli(body).unwrap();
        let ids: Vec<_> = models.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec!["gemini-2.5-pro", "gemini-2.5-flash"]);
    }

    #[test]
    fn parses_mistral_vibe_model_configs() {
        let body = r#"ModelConfig(name="mistral-large-latest", alias="large")"#;
        let models = parse_mistral_vibe(body).unwrap();
        assert_eq!(models[0].id, "mistral-large-latest");
        assert_eq!(models[0].display_name, "large");
    }

    #[test]
    fn opencode_falls_back_to_static_list_when_body_empty() {
        let models = parse_opencode("{}").unwrap();
        assert_eq!(models, static_opencode_fallback());
    }

    #[test]
    fn static_claude_models_is_nonempty_and_stable() {
        let a = static_claude_models();
        let b = static_claude_models();
        assert_eq!(a.len(), b.len());
        assert!(a.iter().any(|m| m.id == "claude-opus-4"));
    }
}
