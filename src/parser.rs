//! Parses raw LLM text into a neutrosophic evaluation.
//!
//! Two paths: a structured path for `(provider, model)` pairs known to honor
//! schema-constrained output, and a tolerant fallback that extracts the
//! first balanced JSON object from free-form text. Both paths funnel through
//! the same validation and produce the same synthetic placeholder on
//! failure — parsing never raises, it degrades into a high-indeterminacy
//! evaluation instead.

use serde::Deserialize;

use crate::llm::Provider;
use crate::neutrosophic::NeutrosophicValue;

/// A fully parsed evaluation, ready to be stored on a [`crate::prompt::Layer`].
#[derive(Debug, Clone)]
pub struct ParsedEvaluation {
    pub value: NeutrosophicValue,
    pub reasoning: String,
    pub patterns_observed: Vec<String>,
}

/// Static, conservative table of `(provider, model)` pairs known to honor a
/// schema-constrained response. Fireworks models are deliberately absent:
/// OpenRouter returns HTTP 400 for schema requests routed to them despite
/// provider claims of support.
fn structured_output_capable(model: &str) -> bool {
    const EXACT: &[&str] = &["openai/gpt-4o", "openai/gpt-4o-mini", "openai/o1", "openai/o1-mini"];
    const PREFIXES: &[&str] = &["openai/gpt-4o-", "openai/o1-"];

    if EXACT.contains(&model) {
        return true;
    }
    PREFIXES.iter().any(|prefix| model.starts_with(prefix))
}

/// Whether the structured path should be attempted for this `(provider,
/// model)` combination. Only OpenRouter-routed OpenAI models are currently
/// eligible; every other provider falls back to tolerant extraction.
pub fn supports_structured_output(provider: Provider, model: &str) -> bool {
    matches!(provider, Provider::OpenRouter | Provider::OpenAI) && structured_output_capable(model)
}

#[derive(Debug, Deserialize)]
struct StructuredResponse {
    truth: f64,
    indeterminacy: f64,
    falsehood: f64,
    reasoning: String,
    #[serde(default)]
    patterns_observed: Vec<String>,
}

fn validate(parsed: StructuredResponse) -> Result<ParsedEvaluation, String> {
    for (name, v) in [
        ("truth", parsed.truth),
        ("indeterminacy", parsed.indeterminacy),
        ("falsehood", parsed.falsehood),
    ] {
        if v.is_nan() || !(0.0..=1.0).contains(&v) {
            return Err(format!("field '{name}' out of range: {v}"));
        }
    }
    if parsed.reasoning.trim().is_empty() {
        return Err("field 'reasoning' is empty".to_string());
    }
    Ok(ParsedEvaluation {
        value: NeutrosophicValue::new(parsed.truth, parsed.indeterminacy, parsed.falsehood),
        reasoning: parsed.reasoning,
        patterns_observed: parsed.patterns_observed,
    })
}

/// Strips a leading/trailing ```json fenced code block, if present.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```json") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else if let Some(rest) = trimmed.strip_prefix("```") {
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    }
}

/// Extracts the first balanced `{...}` object from free-form text, tolerant
/// of surrounding prose and nested braces (e.g. templated doubled-brace
/// output).
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (offset, &byte) in bytes.iter().enumerate().skip(start) {
        let ch = byte as char;
        if in_string {
            if escape {
                escape = false;
            } else if ch == '\\' {
                escape = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parses a raw JSON-ish string into a structured response, tolerating
/// control characters embedded in string values (common in free-form model
/// output).
fn parse_json_lenient(json_str: &str) -> Result<StructuredResponse, String> {
    serde_json::from_str(json_str).map_err(|e| e.to_string())
}

const PLACEHOLDER_REASON_TRUNCATE: usize = 100;
const PLACEHOLDER_RESPONSE_TRUNCATE: usize = 500;

fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Builds the synthetic placeholder evaluation produced whenever either
/// parsing path fails: `(T=0.5, I=1.0, F=0.5)`, with the error reason and the
/// raw response preserved for debugging.
fn parse_error_placeholder(reason: &str, raw_response: &str) -> (ParsedEvaluation, String) {
    let evaluation = ParsedEvaluation {
        value: NeutrosophicValue::new(0.5, 1.0, 0.5),
        reasoning: format!(
            "[PARSE_ERROR: {}]",
            truncate_chars(reason, PLACEHOLDER_REASON_TRUNCATE)
        ),
        patterns_observed: Vec::new(),
    };
    let reasoning_trace = truncate_chars(raw_response, PLACEHOLDER_RESPONSE_TRUNCATE);
    (evaluation, reasoning_trace)
}

/// Parses a raw assistant response into an evaluation, always succeeding:
/// on any failure the synthetic parse-error placeholder is returned instead,
/// with its second element set to the truncated raw response as the
/// accompanying reasoning trace.
pub fn parse_response(raw_response: &str) -> (ParsedEvaluation, Option<String>) {
    let candidate = strip_code_fence(raw_response);
    let json_str = extract_json_object(candidate).unwrap_or(candidate);

    match parse_json_lenient(json_str).and_then(validate) {
        Ok(evaluation) => (evaluation, None),
        Err(reason) => {
            let (placeholder, trace) = parse_error_placeholder(&reason, raw_response);
            (placeholder, Some(trace))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_clean_json() {
        let raw = r#"{"truth": 0.8, "indeterminacy": 0.1, "falsehood": 0.1, "reasoning": "looks fine"}"#;
        let (parsed, trace) = parse_response(raw);
        assert!(trace.is_none());
        assert!((parsed.value.t - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_parses_fenced_json_with_prose() {
        let raw = "Here is my evaluation:\n```json\n{\"truth\": 0.6, \"indeterminacy\": 0.2, \"falsehood\": 0.3, \"reasoning\": \"ok\"}\n```\nThanks.";
        let (parsed, trace) = parse_response(raw);
        assert!(trace.is_none());
        assert!((parsed.value.f - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_missing_required_key_produces_placeholder() {
        let raw = r#"{"truth": 0.8, "falsehood": 0.1}"#;
        let (parsed, trace) = parse_response(raw);
        assert!(trace.is_some());
        assert_eq!(parsed.value, NeutrosophicValue::new(0.5, 1.0, 0.5));
        assert!(parsed.reasoning.starts_with("[PARSE_ERROR:"));
    }

    #[test]
    fn test_unparseable_text_produces_placeholder() {
        let raw = "I refuse to answer in JSON.";
        let (parsed, trace) = parse_response(raw);
        assert!(trace.is_some());
        assert_eq!(parsed.value, NeutrosophicValue::new(0.5, 1.0, 0.5));
    }

    #[test]
    fn test_out_of_range_value_produces_placeholder() {
        let raw = r#"{"truth": 1.5, "indeterminacy": 0.1, "falsehood": 0.1, "reasoning": "bad"}"#;
        let (parsed, _trace) = parse_response(raw);
        assert_eq!(parsed.value, NeutrosophicValue::new(0.5, 1.0, 0.5));
    }

    #[test]
    fn test_idempotent_parse() {
        let raw = r#"{"truth": 0.4, "indeterminacy": 0.4, "falsehood": 0.4, "reasoning": "steady"}"#;
        let (a, _) = parse_response(raw);
        let (b, _) = parse_response(raw);
        assert_eq!(a.value, b.value);
        assert_eq!(a.reasoning, b.reasoning);
    }

    #[test]
    fn test_supports_structured_output_exact_and_prefix() {
        assert!(supports_structured_output(Provider::OpenRouter, "openai/gpt-4o"));
        assert!(supports_structured_output(Provider::OpenRouter, "openai/gpt-4o-2024-08-06"));
        assert!(!supports_structured_output(Provider::OpenRouter, "fireworks/llama-v3"));
        assert!(!supports_structured_output(Provider::Anthropic, "claude-3-5-sonnet"));
    }
}
