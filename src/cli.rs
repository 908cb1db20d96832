//! CLI argument parsing for the refinement relay.
//!
//! The CLI is thin: it reads inputs, builds a request, and prints the result.
//! All policy lives in the pipeline modules.
use crate::schema::Provider;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "refiner",
    version,
    about = "Refine rough task prompts through an AI CLI, with an offline fallback",
    after_help = "Commands:\n  refine --prompt <text>   Refine a prompt (reads stdin when --prompt is omitted)\n  analyze --prompt <text>  Offline template/tag/risk analysis only\n  rules                    Print the effective rule document\n\nEnvironment:\n  REFINER_LM_COMMAND       Command line for the default provider ({model} placeholder)\n  REFINER_ALT_LM_COMMAND   Command line for the alternate provider\n  REFINER_RULES            Path to a rules JSON file\n  REFINER_LOG              Log filter (default: warn)\n\nExamples:\n  refiner refine --prompt \"write a csv importer\" --tag etl\n  echo \"add auth to the api\" | refiner refine --provider alternate\n  refiner analyze --prompt \"drop the legacy tables\"",
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct RootArgs {
    /// Emit debug logs on stderr
    #[arg(long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    Refine(RefineArgs),
    Analyze(AnalyzeArgs),
    Rules(RulesArgs),
}

/// Prompt and rule inputs shared by commands that analyze a prompt.
#[derive(Args, Debug)]
pub struct PromptInput {
    /// Prompt text; read from stdin when omitted
    #[arg(long, value_name = "TEXT")]
    pub prompt: Option<String>,

    /// Rules JSON file (overrides REFINER_RULES and the user config dir)
    #[arg(long, value_name = "PATH")]
    pub rules: Option<PathBuf>,
}

#[derive(Parser, Debug)]
#[command(about = "Refine a prompt through the configured AI CLI")]
pub struct RefineArgs {
    #[command(flatten)]
    pub input: PromptInput,

    /// Extra context passed to the AI CLI
    #[arg(long, value_name = "TEXT")]
    pub context: Option<String>,

    /// Tag to suggest (repeatable)
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,

    /// Provider CLI to use
    #[arg(long, value_enum, default_value_t = ProviderArg::Default)]
    pub provider: ProviderArg,

    /// Model override for the selected provider
    #[arg(long, value_name = "MODEL")]
    pub model: Option<String>,

    /// Seconds to wait for the provider CLI before falling back
    #[arg(long, value_name = "SECONDS", default_value_t = 30)]
    pub timeout: u64,

    /// Print single-line JSON
    #[arg(long)]
    pub compact: bool,

    /// Exit with status 3 when the result came from a fallback path
    #[arg(long)]
    pub fail_on_degraded: bool,
}

#[derive(Parser, Debug)]
#[command(about = "Run the offline template, tag and risk analysis")]
pub struct AnalyzeArgs {
    #[command(flatten)]
    pub input: PromptInput,
}

#[derive(Parser, Debug)]
#[command(about = "Print the effective rule document as JSON")]
pub struct RulesArgs {
    /// Rules JSON file to load
    #[arg(long, value_name = "PATH", conflicts_with = "builtin")]
    pub rules: Option<PathBuf>,

    /// Print the built-in rule document, ignoring any rules file
    #[arg(long)]
    pub builtin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ProviderArg {
    Default,
    Alternate,
}

impl From<ProviderArg> for Provider {
    fn from(value: ProviderArg) -> Self {
        match value {
            ProviderArg::Default => Provider::Default,
            ProviderArg::Alternate => Provider::Alternate,
        }
    }
}
