//! Contracts for the cloud collaborators the wake trigger talks to, plus the
//! HTTP implementations used in production.

pub mod events;
pub mod metadata;

#[cfg(test)]
pub(crate) mod stub;

use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum CloudError {
    #[error("instance metadata {what} unavailable (status {status})")]
    MetadataUnavailable { what: &'static str, status: u16 },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error("event bus rejected publish (status {status}): {body}")]
    PublishRejected { status: u16, body: String },
    #[error("no event bus endpoint configured, join attempt not forwarded")]
    NotForwarded,
}

impl From<reqwest::Error> for CloudError {
    fn from(err: reqwest::Error) -> Self {
        CloudError::Transport(err.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceIdentity {
    pub region: String,
    pub account_id: String,
    pub instance_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAttempt {
    pub stack_id: String,
    pub instance_id: String,
    pub region: String,
    pub account_id: String,
    pub client_address: String,
}

impl JoinAttempt {
    pub fn new(stack_id: String, identity: InstanceIdentity, client_address: &str) -> Self {
        Self {
            stack_id,
            instance_id: identity.instance_id,
            region: identity.region,
            account_id: identity.account_id,
            client_address: client_address.to_string(),
        }
    }

    pub fn instance_arn(&self) -> String {
        format!(
            "arn:aws:ec2:{}:{}:instance/{}",
            self.region, self.account_id, self.instance_id
        )
    }
}

pub trait InstanceMetadata: Send + Sync {
    fn stack_identifier(&self) -> Result<String, CloudError>;
    fn instance_identity(&self) -> Result<InstanceIdentity, CloudError>;
}

pub trait EventBus: Send + Sync {
    /// Returns the bus response, kept only for logging.
    fn publish_join_attempt(&self, attempt: &JoinAttempt) -> Result<String, CloudError>;
}
