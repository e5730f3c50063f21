//! Remote message source.

use crate::logutil::escape_log;
use crate::validation::encode_path_segment;
use async_trait::async_trait;
use log::{debug, warn};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// A message announced by the remote source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageDescriptor {
    pub id: String,
    pub payload_url: String,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Ask for the next message. `Ok(None)` means nothing to play right now.
    async fn poll(&self) -> Result<Option<MessageDescriptor>, SourceError>;

    /// Tell the source the message was consumed. Best-effort: `false` on any failure.
    async fn acknowledge(&self, id: &str) -> bool;
}

/// Wire shape of the poll response. The source also announces non-audio posts,
/// which carry no payload URL.
#[derive(Debug, Deserialize)]
struct PollResponse {
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    mp3_url: Option<String>,
    #[serde(default)]
    payload_url: Option<String>,
    #[serde(default)]
    id: Option<serde_json::Value>,
}

impl PollResponse {
    /// `mp3_url` first; `payload_url` is the newer spelling and either may be blank.
    fn payload(&self) -> Option<String> {
        [&self.mp3_url, &self.payload_url]
            .into_iter()
            .flatten()
            .find(|u| !u.trim().is_empty())
            .cloned()
    }

    fn into_descriptor(self) -> Option<MessageDescriptor> {
        let payload = self.payload();
        let id = match self.id {
            Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s,
            Some(serde_json::Value::Number(n)) => n.to_string(),
            _ => {
                if payload.is_some() {
                    warn!("poll response carries a payload but no usable id; ignoring it");
                }
                return None;
            }
        };
        match payload {
            Some(payload_url) => Some(MessageDescriptor { id, payload_url }),
            None => {
                debug!(
                    "message {} has no audio payload (type {})",
                    id,
                    self.kind.as_deref().unwrap_or("unknown")
                );
                None
            }
        }
    }
}

/// HTTP source: `GET <poll_url>` for descriptors and `DELETE <ack_url>/<id>` to
/// acknowledge.
pub struct HttpMessageSource {
    client: reqwest::Client,
    poll_url: String,
    ack_url: String,
}

impl HttpMessageSource {
    pub fn new(poll_url: impl Into<String>, ack_url: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("postbox/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            poll_url: poll_url.into(),
            ack_url: ack_url.into(),
        })
    }

    fn ack_url_for(&self, id: &str) -> String {
        format!(
            "{}/{}",
            self.ack_url.trim_end_matches('/'),
            encode_path_segment(id)
        )
    }
}

#[async_trait]
impl MessageSource for HttpMessageSource {
    async fn poll(&self) -> Result<Option<MessageDescriptor>, SourceError> {
        let response = self.client.get(&self.poll_url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                body: escape_log(&body),
            });
        }
        if body.trim().is_empty() || body.trim() == "null" {
            return Ok(None);
        }
        let parsed: PollResponse = serde_json::from_str(&body)
            .map_err(|e| SourceError::Malformed(format!("{} in {}", e, escape_log(&body))))?;
        Ok(parsed.into_descriptor())
    }

    async fn acknowledge(&self, id: &str) -> bool {
        let url = self.ack_url_for(id);
        match self.client.delete(&url).send().await {
            Ok(response) if response.status() == reqwest::StatusCode::OK => true,
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!(
                    "acknowledging message {} returned {}: {}",
                    id,
                    status,
                    escape_log(&body)
                );
                false
            }
            Err(e) => {
                warn!("acknowledging message {} failed: {}", id, e);
                false
            }
        }
    }
}
