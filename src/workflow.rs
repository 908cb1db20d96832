use crate::cli::{AnalyzeArgs, PromptInput, RefineArgs, RulesArgs};
use crate::heuristics;
use crate::refine::{ProviderTable, RefineError, Refiner};
use crate::rules::{self, RuleDocument};
use crate::schema::RefinementRequest;
use anyhow::{Context, Result};
use serde::Serialize;
use std::io::{self, Read};
use std::process::ExitCode;
use std::time::Duration;

/// Exit status for requests rejected before any work was done.
const EXIT_INVALID_REQUEST: u8 = 2;
/// Exit status for `--fail-on-degraded` when a fallback path was taken.
const EXIT_DEGRADED: u8 = 3;

pub fn run_refine(args: RefineArgs) -> Result<ExitCode> {
    let rules = rules::load_rules(args.input.rules.as_deref());
    let providers = ProviderTable::from_env()?;
    let prompt = read_prompt(&args.input)?;

    let mut request = RefinementRequest::new(prompt)
        .with_tags(args.tags)
        .with_provider(args.provider.into());
    if let Some(context) = args.context {
        request = request.with_context(context);
    }
    if let Some(model) = args.model {
        request = request.with_model(model);
    }

    let refiner = Refiner::new(&rules, providers).with_timeout(Duration::from_secs(args.timeout));
    let result = match refiner.refine(&request) {
        Ok(result) => result,
        Err(RefineError::Validation(message)) => {
            eprintln!("error: {message}");
            return Ok(ExitCode::from(EXIT_INVALID_REQUEST));
        }
    };

    let degraded = result.is_degraded();
    if degraded {
        tracing::warn!("result produced by a fallback path");
    }
    print_json(&result, args.compact)?;
    if degraded && args.fail_on_degraded {
        return Ok(ExitCode::from(EXIT_DEGRADED));
    }
    Ok(ExitCode::SUCCESS)
}

pub fn run_analyze(args: AnalyzeArgs) -> Result<ExitCode> {
    let rules = rules::load_rules(args.input.rules.as_deref());
    let prompt = read_prompt(&args.input)?;
    if prompt.trim().is_empty() {
        eprintln!("error: prompt must not be empty");
        return Ok(ExitCode::from(EXIT_INVALID_REQUEST));
    }
    print_json(&heuristics::analyze(&prompt, &rules), false)?;
    Ok(ExitCode::SUCCESS)
}

pub fn run_rules(args: RulesArgs) -> Result<ExitCode> {
    if args.builtin {
        println!("{}", rules::rules_stub()?);
        return Ok(ExitCode::SUCCESS);
    }
    let rules: RuleDocument = rules::load_rules(args.rules.as_deref());
    print_json(&rules, false)?;
    Ok(ExitCode::SUCCESS)
}

fn read_prompt(input: &PromptInput) -> Result<String> {
    if let Some(prompt) = &input.prompt {
        return Ok(prompt.clone());
    }
    let mut prompt = String::new();
    io::stdin()
        .read_to_string(&mut prompt)
        .context("read prompt from stdin")?;
    Ok(prompt)
}

fn print_json<T: Serialize>(value: &T, compact: bool) -> Result<()> {
    let text = if compact {
        serde_json::to_string(value)
    } else {
        serde_json::to_string_pretty(value)
    }
    .context("serialize output")?;
    println!("{text}");
    Ok(())
}
