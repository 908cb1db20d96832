//! Refinement orchestration.
//!
//! One call runs a fixed pipeline: validate the request, build the outbound
//! prompt, invoke the provider CLI once, reconcile its output (or build an
//! offline result when the CLI fails), then enrich the result so every field
//! is populated. There are no retries and no state shared between calls.
use crate::heuristics::{self, default_metadata, RISK_GENERIC};
use crate::invoke::{invoke, InvokeError};
use crate::reconcile::{reconcile, FALLBACK_RATIONALE};
use crate::rules::RuleDocument;
use crate::schema::{Provider, RefinedResult, RefinementRequest, TemplateMetadata, MAX_TAGS};
use crate::templates;
use crate::util::{dedup_capped, truncate_string};
use anyhow::{anyhow, Context, Result};
use regex::{Captures, Regex};
use std::env;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Command line override for the default provider.
pub const LM_COMMAND_ENV: &str = "REFINER_LM_COMMAND";
/// Command line override for the alternate provider.
pub const ALT_LM_COMMAND_ENV: &str = "REFINER_ALT_LM_COMMAND";

pub const MODEL_PLACEHOLDER: &str = "{model}";

pub const OFFLINE_RISK: &str = "AI backend unavailable — offline analysis used";
pub const FALLBACK_TAG: &str = "fallback";
pub const OFFLINE_TAG: &str = "offline";
pub const GENERAL_TAG: &str = "general";
pub const DEFAULT_RATIONALE: &str =
    "Refined with the default template; the AI backend gave no rationale.";

const MAX_FAILURE_DETAIL_BYTES: usize = 400;

#[derive(Debug, Error)]
pub enum RefineError {
    #[error("invalid request: {0}")]
    Validation(String),
}

/// How to launch one provider's CLI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderCommand {
    pub program: String,
    /// Arguments; `{model}` is replaced with the selected model.
    pub args: Vec<String>,
    pub default_model: String,
}

impl ProviderCommand {
    pub fn builtin(provider: Provider) -> Self {
        match provider {
            Provider::Default => ProviderCommand {
                program: "claude".to_string(),
                args: vec![
                    "--print".to_string(),
                    "--model".to_string(),
                    MODEL_PLACEHOLDER.to_string(),
                ],
                default_model: "sonnet".to_string(),
            },
            Provider::Alternate => ProviderCommand {
                program: "gemini".to_string(),
                args: vec!["--model".to_string(), MODEL_PLACEHOLDER.to_string()],
                default_model: "gemini-2.5-flash".to_string(),
            },
        }
    }

    /// Parse a shell-style command line such as `ollama run {model}`.
    pub fn parse(command_line: &str, default_model: &str) -> Result<Self> {
        let mut argv = shell_words::split(command_line)
            .with_context(|| format!("parse LM command: {command_line}"))?;
        if argv.is_empty() {
            return Err(anyhow!("LM command is empty"));
        }
        let program = argv.remove(0);
        Ok(ProviderCommand {
            program,
            args: argv,
            default_model: default_model.to_string(),
        })
    }

    /// Arguments with the model placeholder filled in.
    pub fn args_for(&self, model: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(MODEL_PLACEHOLDER, model))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderTable {
    default: ProviderCommand,
    alternate: ProviderCommand,
}

impl Default for ProviderTable {
    fn default() -> Self {
        ProviderTable {
            default: ProviderCommand::builtin(Provider::Default),
            alternate: ProviderCommand::builtin(Provider::Alternate),
        }
    }
}

impl ProviderTable {
    /// Built-in commands, overridden by `REFINER_LM_COMMAND` and
    /// `REFINER_ALT_LM_COMMAND` when set.
    pub fn from_env() -> Result<Self> {
        let mut table = ProviderTable::default();
        for (provider, var) in [
            (Provider::Default, LM_COMMAND_ENV),
            (Provider::Alternate, ALT_LM_COMMAND_ENV),
        ] {
            let Ok(raw) = env::var(var) else {
                continue;
            };
            if raw.trim().is_empty() {
                continue;
            }
            let default_model = table.get(provider).default_model.clone();
            let command =
                ProviderCommand::parse(&raw, &default_model).with_context(|| format!("parse {var}"))?;
            table = table.with_command(provider, command);
        }
        Ok(table)
    }

    pub fn with_command(mut self, provider: Provider, command: ProviderCommand) -> Self {
        match provider {
            Provider::Default => self.default = command,
            Provider::Alternate => self.alternate = command,
        }
        self
    }

    pub fn get(&self, provider: Provider) -> &ProviderCommand {
        match provider {
            Provider::Default => &self.default,
            Provider::Alternate => &self.alternate,
        }
    }
}

/// The refinement pipeline. Holds only read-only state, so one instance can
/// serve concurrent callers.
#[derive(Debug, Clone)]
pub struct Refiner<'a> {
    rules: &'a RuleDocument,
    providers: ProviderTable,
    timeout: Duration,
}

impl<'a> Refiner<'a> {
    pub fn new(rules: &'a RuleDocument, providers: ProviderTable) -> Self {
        Refiner {
            rules,
            providers,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Refine a prompt. Fails only when the request itself is invalid.
    pub fn refine(&self, request: &RefinementRequest) -> Result<RefinedResult, RefineError> {
        if request.prompt.trim().is_empty() {
            return Err(RefineError::Validation(
                "prompt must not be empty".to_string(),
            ));
        }

        let command = self.providers.get(request.provider);
        let model = request
            .model
            .as_deref()
            .map(str::trim)
            .filter(|model| !model.is_empty())
            .unwrap_or(command.default_model.as_str());
        let payload = build_prompt(request, self.rules);
        tracing::debug!(
            provider = %request.provider,
            program = %command.program,
            model,
            "refining prompt"
        );

        let result = match invoke(
            &command.program,
            &command.args_for(model),
            &payload,
            self.timeout,
        ) {
            Ok(stdout) => reconcile(&stdout, request, self.rules),
            Err(err) => {
                tracing::warn!(provider = %request.provider, "{err}; using offline analysis");
                error_fallback(&err, request, self.rules)
            }
        };
        Ok(enrich(result, request, self.rules))
    }
}

/// Compose the prompt written to the provider's stdin.
pub fn build_prompt(request: &RefinementRequest, rules: &RuleDocument) -> String {
    let context_section = match request.context.as_deref().map(str::trim) {
        Some(context) if !context.is_empty() => format!("\n# Context\n\n{context}\n"),
        _ => String::new(),
    };
    let tags: Vec<&str> = request
        .tags
        .iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .collect();
    let tags_section = if tags.is_empty() {
        String::new()
    } else {
        format!("\n# Suggested Tags\n\n{}\n", tags.join(", "))
    };
    let template = heuristics::detect_template(&request.prompt);
    let sections = heuristics::template_metadata(template, rules)
        .sections
        .join(" > ");

    fill_placeholders(
        templates::REFINE_BASE_MD,
        &[
            ("system_prompt", rules.main_refiner()),
            ("prompt", request.prompt.trim()),
            ("context_section", context_section.as_str()),
            ("tags_section", tags_section.as_str()),
            ("template", template.as_str()),
            ("sections", sections.as_str()),
            ("output_format", templates::REFINE_OUTPUT_FORMAT_MD.trim_end()),
        ],
    )
}

fn placeholder_regex() -> Option<&'static Regex> {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    PLACEHOLDER
        .get_or_init(|| Regex::new(r"\{(\w+)\}").ok())
        .as_ref()
}

/// Substitute `{name}` placeholders in one pass. Inserted values are never
/// rescanned, and unknown names are left as written.
fn fill_placeholders(template: &str, values: &[(&str, &str)]) -> String {
    let Some(placeholder) = placeholder_regex() else {
        return template.to_string();
    };
    placeholder
        .replace_all(template, |caps: &Captures| {
            let name = &caps[1];
            values
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Offline result used when the provider CLI could not deliver any output.
pub fn error_fallback(
    err: &InvokeError,
    request: &RefinementRequest,
    rules: &RuleDocument,
) -> RefinedResult {
    let analysis = heuristics::analyze(&request.prompt, rules);
    let mut risks = vec![OFFLINE_RISK.to_string()];
    risks.extend(analysis.risks);
    let markers = [FALLBACK_TAG, OFFLINE_TAG].map(str::to_string);
    RefinedResult {
        improved_prompt: request.prompt.clone(),
        rationale: format!(
            "AI backend unavailable ({}); result synthesized offline from the heuristic template.",
            truncate_string(&err.to_string(), MAX_FAILURE_DETAIL_BYTES)
        ),
        risks,
        tags: dedup_capped(
            markers
                .into_iter()
                .chain(analysis.tags)
                .chain(request.tags.iter().cloned()),
            MAX_TAGS,
        ),
        metadata: analysis.metadata,
    }
}

/// Fill every empty field with its default. Applying it twice changes nothing.
pub fn enrich(
    result: RefinedResult,
    request: &RefinementRequest,
    rules: &RuleDocument,
) -> RefinedResult {
    let defaults = default_metadata();
    let mut tags = dedup_capped(result.tags, MAX_TAGS);
    if tags.is_empty() {
        tags = dedup_capped(heuristics::suggest_tags(&request.prompt, rules), MAX_TAGS);
    }
    if tags.is_empty() {
        tags = vec![GENERAL_TAG.to_string()];
    }

    RefinedResult {
        improved_prompt: non_blank(result.improved_prompt)
            .unwrap_or_else(|| request.prompt.clone()),
        rationale: non_blank(result.rationale).unwrap_or_else(|| DEFAULT_RATIONALE.to_string()),
        risks: or_default(result.risks, || vec![RISK_GENERIC.to_string()]),
        tags,
        metadata: TemplateMetadata {
            sections: or_default(result.metadata.sections, || defaults.sections.clone()),
            acceptance_criteria: or_default(result.metadata.acceptance_criteria, || {
                defaults.acceptance_criteria.clone()
            }),
            checklist: or_default(result.metadata.checklist, || defaults.checklist.clone()),
        },
    }
}

fn non_blank(text: String) -> Option<String> {
    if text.trim().is_empty() {
        None
    } else {
        Some(text)
    }
}

fn or_default(items: Vec<String>, default: impl FnOnce() -> Vec<String>) -> Vec<String> {
    let kept: Vec<String> = items
        .into_iter()
        .filter(|item| !item.trim().is_empty())
        .collect();
    if kept.is_empty() {
        default()
    } else {
        kept
    }
}

impl RefinedResult {
    /// Whether this result came from a degraded path, judged from its markers.
    pub fn is_degraded(&self) -> bool {
        self.rationale == FALLBACK_RATIONALE
            || self.risks.iter().any(|risk| risk == OFFLINE_RISK)
            || self
                .tags
                .iter()
                .any(|tag| tag == OFFLINE_TAG || tag == FALLBACK_TAG)
    }
}

#[cfg(test)]
#[path = "refine_tests.rs"]
mod tests;
