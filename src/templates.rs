pub const DEFAULT_RULES_JSON: &str = include_str!("../templates/default_rules.json");
pub const REFINE_BASE_MD: &str = include_str!("../prompts/refine_base.md");
pub const REFINE_OUTPUT_FORMAT_MD: &str = include_str!("../prompts/refine_output_format.md");
