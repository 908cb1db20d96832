//! Offline prompt analysis.
//!
//! Everything here is case-insensitive substring matching against fixed
//! keyword tables, so results are deterministic and need nothing beyond the
//! rule document. Table order is significant: the first matching template
//! group wins, and tags/risks are emitted in table order.
use crate::rules::RuleDocument;
use crate::schema::TemplateMetadata;
use crate::util::push_unique;
use serde::Serialize;
use std::fmt;

/// Section list used when a category has no configured sections.
pub const DEFAULT_SECTIONS: &[&str] = &["Plan", "Risks", "Next actions", "Tests"];

pub const RISK_SECRETS: &str = "Handle credentials and secrets safely: never hard-code them, load them from the environment or a secret manager.";
pub const RISK_PERFORMANCE: &str = "Large volumes or heavy load can degrade performance: plan batching, pagination and indexing.";
pub const RISK_DATA_VALIDATION: &str =
    "Validate and sanitize input data before processing or persisting it.";
pub const RISK_EXTERNAL_DEPENDENCY: &str = "External services can fail, throttle or change: add timeouts, retries and clear error handling.";
pub const RISK_FILESYSTEM: &str = "Filesystem access can fail on permissions or missing paths: check paths and handle I/O errors.";
pub const RISK_RECOVERY: &str =
    "Destructive or migration steps need a backup and a tested rollback path.";
pub const RISK_GENERIC: &str =
    "Review the implementation carefully before relying on it in production.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateCategory {
    SoftwareDevelopment,
    DataProcessing,
    Documentation,
    General,
}

impl TemplateCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            TemplateCategory::SoftwareDevelopment => "software_development",
            TemplateCategory::DataProcessing => "data_processing",
            TemplateCategory::Documentation => "documentation",
            TemplateCategory::General => "general",
        }
    }

    fn acceptance_criteria(&self) -> &'static [&'static str] {
        match self {
            TemplateCategory::SoftwareDevelopment => &[
                "The feature behaves as described in the prompt",
                "Automated tests cover the main paths and edge cases",
                "Errors are handled and reported clearly",
            ],
            TemplateCategory::DataProcessing => &[
                "Input data is validated before it is stored",
                "Transformations are reproducible and logged",
                "Invalid records are reported, not silently dropped",
            ],
            TemplateCategory::Documentation => &[
                "The target audience can follow the document without extra context",
                "Examples are accurate and runnable",
            ],
            TemplateCategory::General => &[
                "The task goal is clearly stated",
                "Success can be verified objectively",
            ],
        }
    }

    fn checklist(&self) -> &'static [&'static str] {
        match self {
            TemplateCategory::SoftwareDevelopment => &[
                "Requirements confirmed",
                "Design reviewed",
                "Code implemented",
                "Tests passing",
                "Deployment steps documented",
            ],
            TemplateCategory::DataProcessing => &[
                "Data sources identified",
                "Validation rules defined",
                "Transformation tested on sample data",
                "Storage schema prepared",
                "Monitoring in place",
            ],
            TemplateCategory::Documentation => &[
                "Audience defined",
                "Outline approved",
                "Content written",
                "Reviewed for accuracy",
            ],
            TemplateCategory::General => &[
                "Plan drafted",
                "Risks reviewed",
                "Next actions assigned",
                "Tests defined",
            ],
        }
    }
}

impl fmt::Display for TemplateCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct KeywordRule {
    label: &'static str,
    keywords: &'static [&'static str],
}

// Checked in order; development must stay ahead of data.
const TEMPLATE_RULES: &[(TemplateCategory, &[&str])] = &[
    (
        TemplateCategory::SoftwareDevelopment,
        &[
            "script",
            "code",
            "código",
            "codigo",
            "function",
            "função",
            "api",
            "application",
            "aplicação",
            "aplicativo",
            "implement",
            "develop",
            "desenvolv",
            "program",
            "refactor",
            "bug",
        ],
    ),
    (
        TemplateCategory::DataProcessing,
        &[
            "csv",
            "postgres",
            "mysql",
            "sql",
            "database",
            "banco de dados",
            "dados",
            "data",
            "etl",
            "spreadsheet",
            "planilha",
        ],
    ),
    (
        TemplateCategory::Documentation,
        &[
            "document", "readme", "tutorial", "guide", "guia", "manual", "docs",
        ],
    ),
];

const TAG_RULES: &[KeywordRule] = &[
    KeywordRule {
        label: "api",
        keywords: &["api", "rest", "endpoint", "graphql"],
    },
    KeywordRule {
        label: "testing",
        keywords: &["test", "coverage", "tdd"],
    },
    KeywordRule {
        label: "performance",
        keywords: &[
            "performance",
            "desempenho",
            "latency",
            "latência",
            "optimiz",
            "otimiz",
            "fast",
            "rápid",
            "throughput",
        ],
    },
    KeywordRule {
        label: "automation",
        keywords: &["automa", "script", "cron", "schedul", "agend", "workflow"],
    },
    KeywordRule {
        label: "data",
        keywords: &[
            "data", "dados", "csv", "json", "sql", "postgres", "mysql", "mongo", "database",
            "banco", "storage", "armazen",
        ],
    },
    KeywordRule {
        label: "development",
        keywords: &[
            "build",
            "create",
            "criar",
            "crie",
            "develop",
            "desenvolv",
            "implement",
            "construir",
            "construa",
        ],
    },
    KeywordRule {
        label: "security",
        keywords: &[
            "security",
            "segurança",
            "seguranca",
            "auth",
            "password",
            "senha",
            "token",
            "encrypt",
            "criptograf",
        ],
    },
    KeywordRule {
        label: "documentation",
        keywords: &["document", "readme", "docs", "tutorial"],
    },
    KeywordRule {
        label: "deployment",
        keywords: &[
            "deploy",
            "docker",
            "kubernetes",
            "k8s",
            "ci/cd",
            "release",
            "produção",
            "production",
        ],
    },
];

const RISK_RULES: &[KeywordRule] = &[
    KeywordRule {
        label: RISK_SECRETS,
        keywords: &[
            "password",
            "passwd",
            "senha",
            "secret",
            "segredo",
            "token",
            "credential",
            "credencia",
            "api key",
            "api_key",
            "apikey",
            "auth",
            "login",
        ],
    },
    KeywordRule {
        label: RISK_PERFORMANCE,
        keywords: &[
            "performance",
            "desempenho",
            "large",
            "grande",
            "volume",
            "million",
            "milh",
            "bulk",
            "massive",
            "scale",
            "escala",
            "batch",
            "lote",
        ],
    },
    KeywordRule {
        label: RISK_DATA_VALIDATION,
        keywords: &[
            "valid", "input", "entrada", "csv", "parse", "import", "formul", "schema",
        ],
    },
    KeywordRule {
        label: RISK_EXTERNAL_DEPENDENCY,
        keywords: &[
            "api",
            "http",
            "external",
            "extern",
            "third-party",
            "terceiro",
            "webhook",
            "integra",
            "serviço",
            "service",
        ],
    },
    KeywordRule {
        label: RISK_FILESYSTEM,
        keywords: &[
            "file",
            "arquivo",
            "disk",
            "disco",
            "director",
            "diretório",
            "folder",
            "pasta",
            "path",
            "upload",
            "download",
        ],
    },
    KeywordRule {
        label: RISK_RECOVERY,
        keywords: &[
            "delete",
            "apag",
            "remov",
            "drop",
            "truncat",
            "migra",
            "overwrite",
            "sobrescrev",
            "backup",
            "restore",
            "rollback",
            "exclu",
        ],
    },
];

fn contains_any(haystack: &str, keywords: &[&str]) -> bool {
    keywords.iter().any(|keyword| haystack.contains(keyword))
}

/// Pick the template category for a prompt. Never fails.
pub fn detect_template(prompt: &str) -> TemplateCategory {
    let text = prompt.to_lowercase();
    TEMPLATE_RULES
        .iter()
        .find(|(_, keywords)| contains_any(&text, keywords))
        .map(|(category, _)| *category)
        .unwrap_or(TemplateCategory::General)
}

/// Suggest tags: vocabulary hits from `common_tags` first, then derived tags.
///
/// The result is deduplicated and may be empty.
pub fn suggest_tags(prompt: &str, rules: &RuleDocument) -> Vec<String> {
    let text = prompt.to_lowercase();
    let mut tags = Vec::new();
    for tag in &rules.common_tags {
        let needle = tag.trim().to_lowercase();
        if !needle.is_empty() && text.contains(&needle) {
            push_unique(&mut tags, needle);
        }
    }
    for rule in TAG_RULES {
        if contains_any(&text, rule.keywords) {
            push_unique(&mut tags, rule.label.to_string());
        }
    }
    tags
}

/// List advisories for every triggered risk category.
///
/// Falls back to a single generic advisory, so the result is never empty.
pub fn identify_risks(prompt: &str) -> Vec<String> {
    let text = prompt.to_lowercase();
    let risks: Vec<String> = RISK_RULES
        .iter()
        .filter(|rule| contains_any(&text, rule.keywords))
        .map(|rule| rule.label.to_string())
        .collect();
    if risks.is_empty() {
        return vec![RISK_GENERIC.to_string()];
    }
    risks
}

/// Sections, acceptance criteria and checklist for a category.
///
/// Depends only on the category and the rule document, never on prompt text.
pub fn template_metadata(category: TemplateCategory, rules: &RuleDocument) -> TemplateMetadata {
    let sections = match rules.sections_for(category.as_str()) {
        Some(sections) => sections.to_vec(),
        None => default_sections(),
    };
    TemplateMetadata {
        sections,
        acceptance_criteria: to_strings(category.acceptance_criteria()),
        checklist: to_strings(category.checklist()),
    }
}

/// Metadata used when nothing better is available.
pub fn default_metadata() -> TemplateMetadata {
    TemplateMetadata {
        sections: default_sections(),
        acceptance_criteria: to_strings(TemplateCategory::General.acceptance_criteria()),
        checklist: to_strings(TemplateCategory::General.checklist()),
    }
}

pub fn default_sections() -> Vec<String> {
    to_strings(DEFAULT_SECTIONS)
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| item.to_string()).collect()
}

/// Everything the offline analysis knows about a prompt.
#[derive(Debug, Clone, Serialize)]
pub struct PromptAnalysis {
    pub template: TemplateCategory,
    pub tags: Vec<String>,
    pub risks: Vec<String>,
    pub metadata: TemplateMetadata,
}

pub fn analyze(prompt: &str, rules: &RuleDocument) -> PromptAnalysis {
    let template = detect_template(prompt);
    PromptAnalysis {
        template,
        tags: suggest_tags(prompt, rules),
        risks: identify_risks(prompt),
        metadata: template_metadata(template, rules),
    }
}

#[cfg(test)]
#[path = "heuristics_tests.rs"]
mod tests;
