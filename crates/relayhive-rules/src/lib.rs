mod attention_budget;
mod evaluator;
mod loader;

pub use attention_budget::AttentionBudget;
pub use evaluator::evaluate;
pub use loader::{
    default_rules_path, ensure_default_rules, list_rule_files, load_rules, set_rule_active,
};
