//! Intent classification and retrieval strategies.

pub mod classifier;
pub mod dispatcher;
pub mod prompts;
pub mod rules;

pub use classifier::{
    parse_classification, ClassificationResult, Intent, LlmClassifier, QueryClassifier,
    RuleClassifier,
};
pub use dispatcher::{DispatchOutcome, DispatchSettings, Dispatcher};
pub use rules::RuleSet;
