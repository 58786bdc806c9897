use std::sync::Mutex;
use std::time::{Duration, Instant};

use reqwest::blocking::Client;
use tracing::debug;

use crate::cloud::{CloudError, InstanceIdentity, InstanceMetadata};

pub const DEFAULT_METADATA_URL: &str = "http://169.254.169.254";

const TOKEN_PATH: &str = "/latest/api/token";
const STACK_NAME_PATH: &str = "/latest/meta-data/tags/instance/aws:cloudformation:stack-name";
const IDENTITY_PATH: &str = "/latest/dynamic/instance-identity/document";
const TOKEN_TTL_HEADER: &str = "X-aws-ec2-metadata-token-ttl-seconds";
const TOKEN_HEADER: &str = "X-aws-ec2-metadata-token";
const TOKEN_TTL_SECS: &str = "21600";
/// Tokens are renewed this long before the service expires them.
const TOKEN_REUSE: Duration = Duration::from_secs(21_600 - 60);
/// A refused token request is retried after this.
const REFUSAL_REUSE: Duration = Duration::from_secs(60);

#[derive(Debug)]
struct SessionToken {
    value: Option<String>,
    expires: Instant,
}

/// Instance metadata service client. Uses an IMDSv2 session token when the
/// service hands one out and plain IMDSv1 requests otherwise.
#[derive(Debug)]
pub struct ImdsClient {
    base_url: String,
    client: Client,
    token: Mutex<Option<SessionToken>>,
}

impl ImdsClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, CloudError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            token: Mutex::new(None),
        })
    }

    fn session_token(&self) -> Option<String> {
        let now = Instant::now();
        if let Ok(cached) = self.token.lock() {
            if let Some(token) = cached.as_ref().filter(|token| token.expires > now) {
                return token.value.clone();
            }
        }
        let value = self.request_token();
        let reuse = if value.is_some() { TOKEN_REUSE } else { REFUSAL_REUSE };
        if let Ok(mut cached) = self.token.lock() {
            *cached = Some(SessionToken {
                value: value.clone(),
                expires: now + reuse,
            });
        }
        value
    }

    fn request_token(&self) -> Option<String> {
        let response = self
            .client
            .put(format!("{}{}", self.base_url, TOKEN_PATH))
            .header(TOKEN_TTL_HEADER, TOKEN_TTL_SECS)
            .send()
            .ok()?;
        if !response.status().is_success() {
            debug!(status = %response.status(), "metadata token refused, using IMDSv1");
            return None;
        }
        response
            .text()
            .ok()
            .map(|token| token.trim().to_string())
            .filter(|token| !token.is_empty())
    }

    fn get_text(&self, path: &str, what: &'static str) -> Result<String, CloudError> {
        let mut request = self.client.get(format!("{}{}", self.base_url, path));
        if let Some(token) = self.session_token() {
            request = request.header(TOKEN_HEADER, token);
        }
        let response = request.send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(CloudError::MetadataUnavailable {
                what,
                status: status.as_u16(),
            });
        }
        Ok(response.text()?)
    }
}

impl InstanceMetadata for ImdsClient {
    fn stack_identifier(&self) -> Result<String, CloudError> {
        let text = self.get_text(STACK_NAME_PATH, "stack name")?;
        Ok(text.trim().to_string())
    }

    fn instance_identity(&self) -> Result<InstanceIdentity, CloudError> {
        let text = self.get_text(IDENTITY_PATH, "identity document")?;
        serde_json::from_str(&text).map_err(|err| CloudError::InvalidDocument(err.to_string()))
    }
}
