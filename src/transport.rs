//! Pub/Sub transport
//!
//! The [`Transport`] trait is the seam between the publisher and the network:
//! it resolves topic addresses and performs exactly one publish round trip
//! per call. [`PubSubClient`] implements it over the Pub/Sub REST API.
//!
//! # Wire format
//!
//! `POST {api_root}/projects/{project}/topics/{topic}:publish`
//!
//! ```json
//! {"messages": [{"data": "<base64>", "attributes": {"k": "v"}, "orderingKey": "x"}]}
//! ```

use crate::auth::{resolve_credentials, TokenProvider};
use crate::config::PubSubConfig;
use crate::error::{PubSubError, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Fully-qualified topic address: `projects/{project}/topics/{topic}`
pub fn topic_path(project: &str, topic: &str) -> String {
    format!("projects/{project}/topics/{topic}")
}

/// Broker-native message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PubsubMessage {
    /// Opaque payload, base64 on the wire
    #[serde(serialize_with = "serialize_base64")]
    pub data: Vec<u8>,

    /// Empty means no ordering
    #[serde(rename = "orderingKey", skip_serializing_if = "String::is_empty")]
    pub ordering_key: String,

    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, String>,
}

impl PubsubMessage {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_ordering_key(mut self, key: impl Into<String>) -> Self {
        self.ordering_key = key.into();
        self
    }

    pub fn with_attributes(mut self, attributes: HashMap<String, String>) -> Self {
        self.attributes = attributes;
        self
    }
}

fn serialize_base64<S: Serializer>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&BASE64.encode(data))
}

#[derive(Serialize)]
struct PublishRequest<'a> {
    messages: &'a [PubsubMessage],
}

/// Broker acknowledgment of a publish call
///
/// Fields other than `messageIds` are kept in `extra` untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublishResponse {
    #[serde(rename = "messageIds", default)]
    pub message_ids: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Network side of the publisher
///
/// Implementations must be safe to share between concurrent publish calls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Per-call session override type (an HTTP client for [`PubSubClient`])
    type Session: Send + Sync;

    /// Project used when a call does not name one
    fn default_project(&self) -> Option<&str>;

    /// Resolve a logical topic name to its fully-qualified address. No I/O.
    fn resolve_topic(&self, topic: &str, project: Option<&str>) -> Result<String> {
        if topic.is_empty() {
            return Err(PubSubError::Config("topic name cannot be empty".to_string()));
        }
        let project = project
            .or_else(|| self.default_project())
            .filter(|p| !p.is_empty())
            .ok_or_else(|| {
                PubSubError::Config(
                    "no GCP project: pass one explicitly or set GCP_PROJECT".to_string(),
                )
            })?;
        Ok(topic_path(project, topic))
    }

    /// Send one batch in a single round trip.
    async fn publish_once(
        &self,
        topic_address: &str,
        messages: &[PubsubMessage],
        session: Option<&Self::Session>,
        timeout: Duration,
    ) -> Result<PublishResponse>;

    /// Release the session and the client handle. Idempotent.
    async fn close(&self) -> Result<()>;
}

/// Pub/Sub REST client
///
/// Owns a pooled HTTP session (opened at construction) and the token
/// provider. Both are released by [`close`](Transport::close); the client
/// returns [`PubSubError::Closed`] afterwards.
pub struct PubSubClient {
    session: RwLock<Option<reqwest::Client>>,
    auth: Box<dyn TokenProvider>,
    auth_open: AtomicBool,
    api_root: String,
    default_project: Option<String>,
}

impl PubSubClient {
    /// Create a client from configuration
    pub async fn new(config: PubSubConfig) -> Result<Self> {
        config.validate()?;

        let credentials = resolve_credentials(&config).await?;
        let default_project = config.project.clone().or(credentials.project);

        let session = reqwest::Client::builder()
            .timeout(config.session_timeout.as_duration())
            .build()
            .map_err(|e| PubSubError::Config(format!("cannot build HTTP client: {e}")))?;

        let client = Self::with_parts(
            session,
            credentials.provider,
            config.resolved_api_root(),
            default_project,
        );

        tracing::info!(
            api_root = %client.api_root,
            project = ?client.default_project,
            "Pub/Sub client ready"
        );

        Ok(client)
    }

    /// Create a client from an existing session and token provider.
    pub fn with_parts(
        session: reqwest::Client,
        auth: Box<dyn TokenProvider>,
        api_root: impl Into<String>,
        default_project: Option<String>,
    ) -> Self {
        Self {
            session: RwLock::new(Some(session)),
            auth,
            auth_open: AtomicBool::new(true),
            api_root: api_root.into().trim_end_matches('/').to_string(),
            default_project,
        }
    }

    pub fn api_root(&self) -> &str {
        &self.api_root
    }

    pub async fn is_closed(&self) -> bool {
        self.session.read().await.is_none() || !self.auth_open.load(Ordering::Acquire)
    }

    async fn shared_session(&self) -> Result<reqwest::Client> {
        self.session.read().await.clone().ok_or(PubSubError::Closed)
    }

    fn publish_url(&self, topic_address: &str) -> String {
        format!("{}/{}:publish", self.api_root, topic_address)
    }
}

#[async_trait]
impl Transport for PubSubClient {
    type Session = reqwest::Client;

    fn default_project(&self) -> Option<&str> {
        self.default_project.as_deref()
    }

    async fn publish_once(
        &self,
        topic_address: &str,
        messages: &[PubsubMessage],
        session: Option<&reqwest::Client>,
        timeout: Duration,
    ) -> Result<PublishResponse> {
        if !self.auth_open.load(Ordering::Acquire) {
            return Err(PubSubError::Closed);
        }
        let http = match session {
            Some(session) => session.clone(),
            None => self.shared_session().await?,
        };

        tracing::debug!(
            topic = %topic_address,
            count = messages.len(),
            timeout_ms = timeout.as_millis() as u64,
            "Publishing batch to Pub/Sub"
        );

        let mut request = http
            .post(self.publish_url(topic_address))
            .timeout(timeout)
            .json(&PublishRequest { messages });
        if let Some(token) = self.auth.access_token(&http).await? {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PubSubError::from_status(status.as_u16(), body));
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| PubSubError::InvalidResponse(format!("publish response: {e}")))
    }

    async fn close(&self) -> Result<()> {
        let session = self.session.write().await.take();
        let was_open = self.auth_open.swap(false, Ordering::AcqRel);
        if was_open {
            self.auth.invalidate().await;
        }
        if session.is_some() || was_open {
            tracing::info!(api_root = %self.api_root, "Pub/Sub client closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::Anonymous;
    use serde_json::json;

    fn client(project: Option<&str>) -> PubSubClient {
        PubSubClient::with_parts(
            reqwest::Client::new(),
            Box::new(Anonymous),
            "http://localhost:8085/v1/",
            project.map(str::to_string),
        )
    }

    #[test]
    fn test_topic_path() {
        assert_eq!(
            topic_path("ecoscope-dev", "workflow-requests"),
            "projects/ecoscope-dev/topics/workflow-requests"
        );
    }

    #[test]
    fn test_resolve_topic_uses_default_project() {
        let client = client(Some("ecoscope-dev"));
        assert_eq!(
            client.resolve_topic("workflow-requests", None).unwrap(),
            "projects/ecoscope-dev/topics/workflow-requests"
        );
        assert_eq!(
            client.resolve_topic("workflow-requests", Some("other")).unwrap(),
            "projects/other/topics/workflow-requests"
        );
    }

    #[test]
    fn test_resolve_topic_without_project() {
        let err = client(None).resolve_topic("workflow-requests", None).unwrap_err();
        assert!(matches!(err, PubSubError::Config(_)));

        let err = client(None).resolve_topic("workflow-requests", Some("")).unwrap_err();
        assert!(matches!(err, PubSubError::Config(_)));
    }

    #[test]
    fn test_resolve_topic_rejects_empty_topic() {
        let err = client(Some("p")).resolve_topic("", None).unwrap_err();
        assert!(matches!(err, PubSubError::Config(_)));
    }

    #[test]
    fn test_publish_url() {
        let client = client(Some("p"));
        assert_eq!(client.api_root(), "http://localhost:8085/v1");
        assert_eq!(
            client.publish_url("projects/p/topics/t"),
            "http://localhost:8085/v1/projects/p/topics/t:publish"
        );
    }

    #[test]
    fn test_message_wire_encoding() {
        let plain = serde_json::to_value(PubsubMessage::new(b"hello".to_vec())).unwrap();
        assert_eq!(plain, json!({"data": "aGVsbG8="}));

        let attributes = HashMap::from([("key1".to_string(), "value1".to_string())]);
        let ordered = PubsubMessage::new(b"hello".to_vec())
            .with_ordering_key("12345")
            .with_attributes(attributes);
        assert_eq!(
            serde_json::to_value(ordered).unwrap(),
            json!({"data": "aGVsbG8=", "orderingKey": "12345", "attributes": {"key1": "value1"}})
        );
    }

    #[test]
    fn test_publish_response_keeps_extra_fields() {
        let response: PublishResponse =
            serde_json::from_str(r#"{"messageIds": ["7061707768812258"], "trace": "x"}"#).unwrap();
        assert_eq!(response.message_ids, vec!["7061707768812258"]);
        assert_eq!(response.extra.get("trace"), Some(&json!("x")));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_final() {
        let client = client(Some("p"));
        assert!(!client.is_closed().await);

        client.close().await.unwrap();
        client.close().await.unwrap();
        assert!(client.is_closed().await);

        let err = client
            .publish_once("projects/p/topics/t", &[], None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PubSubError::Closed));
    }

    #[tokio::test]
    async fn test_new_rejects_oversized_session_timeout() {
        let config = PubSubConfig::default()
            .with_emulator_host("localhost:8085")
            .with_session_timeout(crate::config::RequestTimeout::secs(1e30));
        let built = PubSubClient::new(config).await;
        assert!(matches!(built, Err(PubSubError::Config(_))));
    }
}
