//! Data model shared by the classifier, dispatcher, notifier and store.

pub mod audit;
pub mod issue;

/// A stored token that does not name any variant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {expected} `{got}`")]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}
