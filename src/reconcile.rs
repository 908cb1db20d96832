//! Turn raw LM stdout into a `RefinedResult`.
//!
//! Output that holds a valid result object (bare, inside narrative text, in a
//! fenced block, or inside a CLI `result` envelope) is taken as-is. Anything
//! else is rebuilt from the heuristic engine. Reconciliation never fails.
use crate::heuristics;
use crate::rules::RuleDocument;
use crate::schema::{validate_refined, RefinedResult, RefinementRequest, MAX_TAGS};
use crate::util::dedup_capped;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

pub const FALLBACK_RATIONALE: &str =
    "Synthesized via fallback template: the AI response did not contain a valid refinement object.";

/// Reconcile LM output for `request`, falling back to heuristics when needed.
///
/// Only the request prompt feeds the heuristics; context is for the LM.
pub fn reconcile(raw_output: &str, request: &RefinementRequest, rules: &RuleDocument) -> RefinedResult {
    match extract_refined(raw_output) {
        Ok(result) => {
            tracing::debug!("lm output accepted");
            result
        }
        Err(reasons) => {
            tracing::debug!(?reasons, "lm output rejected; using fallback template");
            fallback_result(raw_output, request, rules)
        }
    }
}

/// Find the first JSON object in `raw` that validates as a `RefinedResult`.
///
/// Returns every rejection reason when nothing validates.
pub fn extract_refined(raw: &str) -> Result<RefinedResult, Vec<String>> {
    let candidates = json_candidates(raw);
    if candidates.is_empty() {
        return Err(vec!["no JSON object found in output".to_string()]);
    }

    let mut reasons = Vec::new();
    for (idx, candidate) in candidates.iter().enumerate() {
        let value: Value = match serde_json::from_str(candidate) {
            Ok(value) => value,
            Err(err) => {
                reasons.push(format!("candidate {idx} is not valid JSON: {err}"));
                continue;
            }
        };
        if let Some(inner) = envelope_text(&value) {
            match extract_refined(inner) {
                Ok(result) => return Ok(result),
                Err(inner_reasons) => {
                    reasons.extend(
                        inner_reasons
                            .into_iter()
                            .map(|reason| format!("candidate {idx} result: {reason}")),
                    );
                    continue;
                }
            }
        }
        match validate_refined(&value) {
            Ok(result) => return Ok(result),
            Err(found) => reasons.extend(
                found
                    .into_iter()
                    .map(|reason| format!("candidate {idx}: {reason}")),
            ),
        }
    }
    Err(reasons)
}

/// Build a complete result from the prompt alone, salvaging what the LM said.
pub fn fallback_result(
    raw_output: &str,
    request: &RefinementRequest,
    rules: &RuleDocument,
) -> RefinedResult {
    let analysis = heuristics::analyze(&request.prompt, rules);
    RefinedResult {
        improved_prompt: salvage_prompt(raw_output, &request.prompt),
        rationale: FALLBACK_RATIONALE.to_string(),
        risks: analysis.risks,
        tags: dedup_capped(
            analysis.tags.into_iter().chain(request.tags.iter().cloned()),
            MAX_TAGS,
        ),
        metadata: analysis.metadata,
    }
}

/// First output line at least 80% as long as the original prompt, else the
/// original prompt.
pub fn salvage_prompt(raw_output: &str, original: &str) -> String {
    let wanted = original.trim().chars().count() * 4;
    raw_output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty() && line.chars().count() * 5 >= wanted)
        .map(str::to_string)
        .unwrap_or_else(|| original.to_string())
}

/// Text of a CLI envelope such as `{"type":"result","result":"..."}`.
fn envelope_text(value: &Value) -> Option<&str> {
    if value.get("improvedPrompt").is_some() {
        return None;
    }
    value.get("result").and_then(Value::as_str)
}

fn fence_regex() -> Option<&'static Regex> {
    static FENCE: OnceLock<Option<Regex>> = OnceLock::new();
    FENCE
        .get_or_init(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(\{.*?\})\s*```").ok())
        .as_ref()
}

/// Candidate object texts: fenced blocks first, then balanced objects in order.
fn json_candidates(raw: &str) -> Vec<&str> {
    let mut candidates: Vec<&str> = Vec::new();
    if let Some(fence) = fence_regex() {
        for caps in fence.captures_iter(raw) {
            if let Some(body) = caps.get(1) {
                candidates.push(body.as_str());
            }
        }
    }
    for object in balanced_objects(raw) {
        if !candidates.contains(&object) {
            candidates.push(object);
        }
    }
    candidates
}

/// Top-level `{...}` substrings, skipping braces inside string literals.
///
/// An unclosed `{` is skipped so later objects are still found.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut from = 0;
    while let Some(offset) = text[from..].find('{') {
        let start = from + offset;
        match object_len(&text[start..]) {
            Some(len) => {
                found.push(&text[start..start + len]);
                from = start + len;
            }
            None => from = start + 1,
        }
    }
    found
}

fn object_len(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
