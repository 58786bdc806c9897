use std::time::Duration;

use reqwest::blocking::Client;
use serde::Serialize;
use tracing::info;

use crate::cloud::{CloudError, EventBus, JoinAttempt};

pub const DEFAULT_SOURCE: &str = "oros.mcs";
pub const DEFAULT_DETAIL_TYPE: &str = "Standby join attempt";

const PUT_EVENTS_TARGET: &str = "AWSEvents.PutEvents";
const AMZ_JSON: &str = "application/x-amz-json-1.1";

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsRequest<'a> {
    entries: Vec<PutEventsEntry<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct PutEventsEntry<'a> {
    source: &'a str,
    detail_type: &'a str,
    resources: Vec<String>,
    /// JSON document encoded as a string, as the bus expects.
    detail: String,
}

#[derive(Debug, Serialize)]
struct JoinDetail<'a> {
    stack: &'a str,
    #[serde(rename = "instance-id")]
    instance_id: &'a str,
    client: &'a str,
}

/// Renders the single-entry PutEvents body describing a join attempt.
pub fn put_events_body(
    attempt: &JoinAttempt,
    source: &str,
    detail_type: &str,
) -> Result<String, CloudError> {
    let detail = serde_json::to_string(&JoinDetail {
        stack: &attempt.stack_id,
        instance_id: &attempt.instance_id,
        client: &attempt.client_address,
    })
    .map_err(|err| CloudError::InvalidDocument(err.to_string()))?;
    let request = PutEventsRequest {
        entries: vec![PutEventsEntry {
            source,
            detail_type,
            resources: vec![attempt.instance_arn()],
            detail,
        }],
    };
    serde_json::to_string(&request).map_err(|err| CloudError::InvalidDocument(err.to_string()))
}

/// Posts PutEvents entries to an HTTP endpoint, typically a signing relay in
/// front of the regional event bus.
#[derive(Debug, Clone)]
pub struct HttpEventBus {
    endpoint: String,
    source: String,
    detail_type: String,
    client: Client,
}

impl HttpEventBus {
    pub fn new(
        endpoint: &str,
        source: &str,
        detail_type: &str,
        timeout: Duration,
    ) -> Result<Self, CloudError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.to_string(),
            source: source.to_string(),
            detail_type: detail_type.to_string(),
            client,
        })
    }
}

impl EventBus for HttpEventBus {
    fn publish_join_attempt(&self, attempt: &JoinAttempt) -> Result<String, CloudError> {
        let body = put_events_body(attempt, &self.source, &self.detail_type)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", AMZ_JSON)
            .header("X-Amz-Target", PUT_EVENTS_TARGET)
            .body(body)
            .send()?;
        let status = response.status();
        let text = response.text()?;
        if !status.is_success() {
            return Err(CloudError::PublishRejected {
                status: status.as_u16(),
                body: text,
            });
        }
        Ok(text)
    }
}

/// Stands in when no bus endpoint is configured. The entry is logged and the
/// publish reported as failed, so the wake cycle is abandoned.
#[derive(Debug, Clone)]
pub struct LoggingEventBus {
    source: String,
    detail_type: String,
}

impl LoggingEventBus {
    pub fn new(source: &str, detail_type: &str) -> Self {
        Self {
            source: source.to_string(),
            detail_type: detail_type.to_string(),
        }
    }
}

impl EventBus for LoggingEventBus {
    fn publish_join_attempt(&self, attempt: &JoinAttempt) -> Result<String, CloudError> {
        let body = put_events_body(attempt, &self.source, &self.detail_type)?;
        info!(entry = %body, "no event bus configured, join attempt not forwarded");
        Err(CloudError::NotForwarded)
    }
}
