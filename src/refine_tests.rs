use super::*;
use crate::heuristics::{template_metadata, TemplateCategory, RISK_DATA_VALIDATION};
use crate::rules::builtin_rules;
use std::time::Instant;

const VALID: &str = r#"{"improvedPrompt":"x","rationale":"y","risks":["r1"],"tags":["t1"],"metadata":{"sections":["s1"],"acceptanceCriteria":["a1"],"checklist":["c1"]}}"#;
const SCENARIO_PROMPT: &str = "Quero um script que leia CSV e grave no Postgres com validação";

fn sh_provider(script: &str) -> ProviderCommand {
    ProviderCommand {
        program: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            script.to_string(),
            "sh".to_string(),
            MODEL_PLACEHOLDER.to_string(),
        ],
        default_model: "mock-model".to_string(),
    }
}

fn missing_provider() -> ProviderCommand {
    ProviderCommand {
        program: "refiner-test-no-such-lm".to_string(),
        args: vec![],
        default_model: "none".to_string(),
    }
}

fn table_with(command: ProviderCommand) -> ProviderTable {
    ProviderTable::default().with_command(Provider::Default, command)
}

fn print_valid() -> ProviderCommand {
    sh_provider(&format!("cat > /dev/null; printf '%s\\n' '{VALID}'"))
}

#[test]
fn blank_prompt_is_rejected_without_spawning() {
    let rules = builtin_rules();
    let refiner = Refiner::new(&rules, table_with(missing_provider()));
    for prompt in ["", "   \n\t"] {
        let err = refiner.refine(&RefinementRequest::new(prompt)).unwrap_err();
        assert!(matches!(err, RefineError::Validation(_)));
    }
}

#[test]
fn missing_backend_produces_offline_result() {
    let rules = builtin_rules();
    let refiner = Refiner::new(&rules, table_with(missing_provider()));
    let result = refiner
        .refine(&RefinementRequest::new(SCENARIO_PROMPT))
        .unwrap();

    assert_eq!(result.improved_prompt, SCENARIO_PROMPT);
    assert_eq!(
        result.tags,
        vec!["fallback", "offline", "automation", "data"]
    );
    assert_eq!(result.risks[0], OFFLINE_RISK);
    assert!(result.risks.contains(&RISK_DATA_VALIDATION.to_string()));
    assert_eq!(
        result.metadata,
        template_metadata(TemplateCategory::SoftwareDevelopment, &rules)
    );
    assert!(result.rationale.contains("refiner-test-no-such-lm"));
    assert!(result.is_degraded());
}

#[cfg(unix)]
#[test]
fn valid_output_passes_through_unchanged() {
    let rules = builtin_rules();
    let refiner = Refiner::new(&rules, table_with(print_valid()));
    let result = refiner
        .refine(&RefinementRequest::new("anything at all"))
        .unwrap();

    let expected: RefinedResult = serde_json::from_str(VALID).unwrap();
    assert_eq!(result, expected);
    assert!(!result.is_degraded());
}

#[cfg(unix)]
#[test]
fn narrative_output_uses_fallback_template() {
    let rules = builtin_rules();
    let refiner = Refiner::new(
        &rules,
        table_with(sh_provider("cat > /dev/null; echo 'I am not able to do that.'")),
    );
    let result = refiner
        .refine(&RefinementRequest::new(SCENARIO_PROMPT))
        .unwrap();

    assert_eq!(result.rationale, FALLBACK_RATIONALE);
    assert_eq!(result.tags, vec!["automation", "data"]);
    assert!(result.is_degraded());
}

#[cfg(unix)]
#[test]
fn non_zero_exit_names_the_failure_and_model() {
    let rules = builtin_rules();
    let refiner = Refiner::new(
        &rules,
        table_with(sh_provider("echo \"model=$1 refused\" >&2; exit 7")),
    );

    let result = refiner
        .refine(&RefinementRequest::new("plan a birthday party").with_model("custom-model"))
        .unwrap();
    assert!(result.rationale.contains("status 7"), "{}", result.rationale);
    assert!(result.rationale.contains("model=custom-model refused"));
    assert_eq!(result.risks[0], OFFLINE_RISK);
    assert_eq!(result.tags, vec!["fallback", "offline"]);

    let result = refiner
        .refine(&RefinementRequest::new("plan a birthday party").with_model("  "))
        .unwrap();
    assert!(result.rationale.contains("model=mock-model refused"));
}

#[cfg(unix)]
#[test]
fn slow_backend_times_out_into_offline_result() {
    let rules = builtin_rules();
    let refiner = Refiner::new(&rules, table_with(sh_provider("exec sleep 5")))
        .with_timeout(Duration::from_millis(100));

    let start = Instant::now();
    let result = refiner
        .refine(&RefinementRequest::new("plan a birthday party"))
        .unwrap();
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(result.rationale.contains("timed out"), "{}", result.rationale);
    assert!(result.is_degraded());
}

#[cfg(unix)]
#[test]
fn outbound_prompt_reaches_provider_stdin() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let capture = dir.path().join("prompt.txt");
    let command = ProviderCommand {
        program: "sh".to_string(),
        args: vec![
            "-c".to_string(),
            format!("cat > \"$1\"; printf '%s' '{VALID}'"),
            "sh".to_string(),
            capture.display().to_string(),
        ],
        default_model: "mock-model".to_string(),
    };
    let rules = builtin_rules();
    let refiner = Refiner::new(&rules, table_with(command));
    let request = RefinementRequest::new(SCENARIO_PROMPT)
        .with_context("Runs nightly from cron")
        .with_tags(["etl", "nightly"]);
    refiner.refine(&request).unwrap();

    let sent = std::fs::read_to_string(&capture).expect("read captured prompt");
    assert!(sent.starts_with(rules.main_refiner()));
    assert!(sent.contains(SCENARIO_PROMPT));
    assert!(sent.contains("# Context\n\nRuns nightly from cron"));
    assert!(sent.contains("# Suggested Tags\n\netl, nightly"));
    assert!(sent.contains("software_development"));
    assert!(sent.contains("\"acceptanceCriteria\""));
}

#[cfg(unix)]
#[test]
fn alternate_provider_is_used_when_requested() {
    let rules = builtin_rules();
    let table = ProviderTable::default()
        .with_command(Provider::Default, missing_provider())
        .with_command(Provider::Alternate, print_valid());
    let refiner = Refiner::new(&rules, table);

    let result = refiner
        .refine(&RefinementRequest::new("anything").with_provider(Provider::Alternate))
        .unwrap();
    assert!(!result.is_degraded());
    assert_eq!(result.improved_prompt, "x");
}

#[cfg(unix)]
#[test]
fn empty_fields_from_backend_are_enriched() {
    let empty = r#"{"improvedPrompt":" ","rationale":"","risks":[],"tags":[""],"metadata":{"sections":[],"acceptanceCriteria":[],"checklist":[]}}"#;
    let rules = builtin_rules();
    let refiner = Refiner::new(
        &rules,
        table_with(sh_provider(&format!("cat > /dev/null; printf '%s' '{empty}'"))),
    );
    let result = refiner
        .refine(&RefinementRequest::new(SCENARIO_PROMPT))
        .unwrap();

    assert_eq!(result.improved_prompt, SCENARIO_PROMPT);
    assert_eq!(result.rationale, DEFAULT_RATIONALE);
    assert_eq!(result.risks, vec![RISK_GENERIC]);
    assert_eq!(result.tags, vec!["automation", "data"]);
    assert_eq!(result.metadata, default_metadata());
}

#[test]
fn concurrent_calls_are_independent() {
    let rules = builtin_rules();
    let refiner = Refiner::new(&rules, table_with(missing_provider()));
    let prompts = [
        "a script for the csv import",
        "write a README",
        "plan a birthday party",
        "drop the old table",
    ];

    let results: Vec<RefinedResult> = std::thread::scope(|scope| {
        let handles: Vec<_> = prompts
            .iter()
            .map(|prompt| {
                let refiner = &refiner;
                scope.spawn(move || refiner.refine(&RefinementRequest::new(*prompt)).unwrap())
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect()
    });

    for (prompt, result) in prompts.iter().zip(&results) {
        assert_eq!(&result.improved_prompt, prompt);
        assert!(result.is_degraded());
    }
}

#[test]
fn build_prompt_omits_empty_sections() {
    let rules = builtin_rules();
    let prompt = build_prompt(
        &RefinementRequest::new("  plan a birthday party ").with_context("   "),
        &rules,
    );
    assert!(!prompt.contains("# Context"));
    assert!(!prompt.contains("# Suggested Tags"));
    assert!(prompt.contains("\nplan a birthday party\n"));
    assert!(prompt.contains("Detected template: `general`"));
    assert!(prompt.contains("Plan > Risks > Next actions > Tests"));
    assert!(prompt.contains("# Response Format"));
}

#[test]
fn build_prompt_leaves_placeholder_text_in_inputs_alone() {
    let mut rules = builtin_rules();
    rules.system_prompts.main_refiner = "House rules mention {output_format} verbatim.".to_string();
    let request = RefinementRequest::new("write a greeting bot that prints {sections}")
        .with_context("our template literally contains {prompt} and {template}")
        .with_tags(["{tags_section}", "{context_section}"]);

    let prompt = build_prompt(&request, &rules);
    assert!(prompt.starts_with("House rules mention {output_format} verbatim."));
    assert!(prompt.contains("\nwrite a greeting bot that prints {sections}\n"));
    assert!(prompt.contains("# Context\n\nour template literally contains {prompt} and {template}\n"));
    assert!(prompt.contains("# Suggested Tags\n\n{tags_section}, {context_section}\n"));
    assert!(prompt.contains("Detected template: `general`"));
    assert_eq!(prompt.matches("# Response Format").count(), 1);
}

#[test]
fn unknown_placeholders_are_kept() {
    assert_eq!(
        fill_placeholders("{known} and {unknown}", &[("known", "{unknown}")]),
        "{unknown} and {unknown}"
    );
}

#[test]
fn offline_advisory_text_is_stable() {
    assert_eq!(OFFLINE_RISK, "AI backend unavailable — offline analysis used");
}

#[test]
fn enrich_fills_every_empty_field() {
    let rules = builtin_rules();
    let request = RefinementRequest::new("plan a birthday party");
    let result = enrich(RefinedResult::default(), &request, &rules);

    assert_eq!(result.improved_prompt, "plan a birthday party");
    assert_eq!(result.rationale, DEFAULT_RATIONALE);
    assert_eq!(result.risks, vec![RISK_GENERIC]);
    assert_eq!(result.tags, vec![GENERAL_TAG]);
    assert_eq!(result.metadata, default_metadata());
}

#[test]
fn enrich_is_idempotent_and_bounds_tags() {
    let rules = builtin_rules();
    let request = RefinementRequest::new("anything");
    let noisy = RefinedResult {
        improved_prompt: "better".to_string(),
        rationale: "why".to_string(),
        risks: vec!["r".to_string(), " ".to_string()],
        tags: ["a", "b", "a", "c", "d", "e", "f", "g", "h", "i"]
            .iter()
            .map(|tag| tag.to_string())
            .collect(),
        metadata: default_metadata(),
    };

    let once = enrich(noisy, &request, &rules);
    assert_eq!(once.tags, vec!["a", "b", "c", "d", "e", "f", "g", "h"]);
    assert_eq!(once.risks, vec!["r"]);
    assert_eq!(enrich(once.clone(), &request, &rules), once);
}

#[test]
fn provider_command_parses_shell_words() {
    let command = ProviderCommand::parse("ollama run '{model}' --format json", "llama3").unwrap();
    assert_eq!(command.program, "ollama");
    assert_eq!(command.args_for("llama3"), vec!["run", "llama3", "--format", "json"]);
    assert_eq!(command.default_model, "llama3");

    assert!(ProviderCommand::parse("   ", "m").is_err());
    assert!(ProviderCommand::parse("llm 'unclosed", "m").is_err());
}

#[test]
fn builtin_providers_select_model_by_placeholder() {
    let table = ProviderTable::default();
    let default = table.get(Provider::Default);
    assert_eq!(default.program, "claude");
    assert_eq!(default.args_for("opus"), vec!["--print", "--model", "opus"]);
    let alternate = table.get(Provider::Alternate);
    assert_eq!(alternate.program, "gemini");
    assert_eq!(
        alternate.args_for(&alternate.default_model),
        vec!["--model", "gemini-2.5-flash"]
    );
}
