//! Rule document loading.
//!
//! The rule document is parsed once at startup and handed to the heuristic
//! engine and orchestrator by reference. A missing or broken rules file is
//! never fatal: the built-in document embedded in the binary takes its place,
//! and a partially filled file is layered over the built-in values.
use crate::templates;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

/// Environment variable naming a rules file.
pub const RULES_ENV: &str = "REFINER_RULES";

const CONFIG_DIR_NAME: &str = "prompt-refiner";
const RULES_FILE_NAME: &str = "rules.json";

const FALLBACK_MAIN_REFINER: &str = "You turn rough task requests into precise, actionable prompts. Keep the user's intent, make requirements explicit and call out risks.";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleDocument {
    #[serde(default)]
    pub system_prompts: SystemPrompts,
    #[serde(default)]
    pub templates: BTreeMap<String, TemplateRule>,
    /// Descriptive only; nothing keys off these entries.
    #[serde(default)]
    pub risk_categories: BTreeMap<String, String>,
    #[serde(default)]
    pub common_tags: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemPrompts {
    #[serde(default)]
    pub main_refiner: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRule {
    #[serde(default)]
    pub sections: Vec<String>,
}

impl RuleDocument {
    /// Instruction header placed at the top of every outbound prompt.
    pub fn main_refiner(&self) -> &str {
        let text = self.system_prompts.main_refiner.trim();
        if text.is_empty() {
            FALLBACK_MAIN_REFINER
        } else {
            text
        }
    }

    /// Section list configured for a template category, if any.
    pub fn sections_for(&self, category: &str) -> Option<&[String]> {
        self.templates
            .get(category)
            .map(|rule| rule.sections.as_slice())
            .filter(|sections| !sections.is_empty())
    }

    /// Layer `overlay` on top of `self`, keeping any value the overlay omits.
    fn merged_with(mut self, overlay: RuleDocument) -> RuleDocument {
        if !overlay.system_prompts.main_refiner.trim().is_empty() {
            self.system_prompts = overlay.system_prompts;
        }
        for (name, rule) in overlay.templates {
            if !rule.sections.is_empty() {
                self.templates.insert(name, rule);
            }
        }
        self.risk_categories.extend(overlay.risk_categories);
        if !overlay.common_tags.is_empty() {
            self.common_tags = overlay.common_tags;
        }
        self
    }
}

/// The rule document compiled into the binary.
pub fn builtin_rules() -> RuleDocument {
    match serde_json::from_str(templates::DEFAULT_RULES_JSON) {
        Ok(rules) => rules,
        Err(err) => {
            tracing::error!(error = %err, "built-in rules failed to parse");
            RuleDocument::default()
        }
    }
}

/// Render the built-in rule document as pretty JSON, for use as a starting point.
pub fn rules_stub() -> Result<String> {
    serde_json::to_string_pretty(&builtin_rules()).context("serialize built-in rules")
}

/// Parse a rules file body and layer it over the built-in document.
pub fn parse_rules(text: &str) -> Result<RuleDocument> {
    let overlay: RuleDocument = serde_json::from_str(text).context("parse rules JSON")?;
    Ok(builtin_rules().merged_with(overlay))
}

/// Read and parse a rules file from disk.
pub fn read_rules(path: &Path) -> Result<RuleDocument> {
    let text =
        fs::read_to_string(path).with_context(|| format!("read rules {}", path.display()))?;
    parse_rules(&text).with_context(|| format!("load rules {}", path.display()))
}

/// Load the rule document for this process.
///
/// Resolution order: explicit path, `REFINER_RULES`, the user config dir,
/// then the built-in document. Any failure along the way falls back to the
/// built-in document with a warning.
pub fn load_rules(explicit: Option<&Path>) -> RuleDocument {
    let path = resolve_rules_path(
        explicit,
        env::var_os(RULES_ENV),
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR_NAME).join(RULES_FILE_NAME)),
    );
    let Some(path) = path else {
        tracing::debug!("no rules file found; using built-in rules");
        return builtin_rules();
    };
    match read_rules(&path) {
        Ok(rules) => {
            tracing::debug!(path = %path.display(), "loaded rules");
            rules
        }
        Err(err) => {
            tracing::warn!("using built-in rules: {err:#}");
            builtin_rules()
        }
    }
}

/// Pick the rules file to read.
///
/// Explicit and environment paths are returned even when missing so the load
/// failure gets reported; the config dir candidate only counts if it exists.
pub fn resolve_rules_path(
    explicit: Option<&Path>,
    env_value: Option<OsString>,
    config_candidate: Option<PathBuf>,
) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(value) = env_value.filter(|value| !value.is_empty()) {
        return Some(PathBuf::from(value));
    }
    config_candidate.filter(|path| path.is_file())
}

#[cfg(test)]
#[path = "rules_tests.rs"]
mod tests;
