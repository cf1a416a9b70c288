//! Manager configuration.

use crate::store::HookFailureMode;
use serde::{Deserialize, Serialize};

/// What a failing listener does to the committing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListenerFailurePolicy {
    /// Discard every staged change of the session.
    #[default]
    AbortTransaction,
    /// Fail the commit but keep staged changes for retry or rollback.
    RejectCommit,
}

impl From<ListenerFailurePolicy> for HookFailureMode {
    fn from(value: ListenerFailurePolicy) -> Self {
        match value {
            ListenerFailurePolicy::AbortTransaction => Self::AbortTransaction,
            ListenerFailurePolicy::RejectCommit => Self::RejectCommit,
        }
    }
}

/// Options for `ResourceManager`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub listener_failure: ListenerFailurePolicy,
}

impl ManagerConfig {
    /// Parses a JSON document; missing fields take defaults.
    pub fn from_json_str(value: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(value)
    }
}

#[cfg(test)]
mod tests {
    use super::{ListenerFailurePolicy, ManagerConfig};

    #[test]
    fn defaults_abort_the_transaction() {
        assert_eq!(
            ManagerConfig::default().listener_failure,
            ListenerFailurePolicy::AbortTransaction
        );
        assert_eq!(
            ManagerConfig::from_json_str("{}").unwrap(),
            ManagerConfig::default()
        );
    }

    #[test]
    fn parses_snake_case_policy() {
        let config = ManagerConfig::from_json_str(r#"{"listener_failure":"reject_commit"}"#)
            .unwrap();
        assert_eq!(config.listener_failure, ListenerFailurePolicy::RejectCommit);
        assert!(ManagerConfig::from_json_str(r#"{"listener_failure":"ignore"}"#).is_err());
    }
}
