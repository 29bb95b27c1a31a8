pub mod classifier;
pub mod types;

pub use classifier::{rank, IntentClassifier, RuleClassifier};
pub use types::{IntentCandidate, IntentLabel, SlotName, SlotSpec};
