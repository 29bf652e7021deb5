//! Pub/Sub Publisher implementation
//!
//! [`Publisher`] is the public entry point of the publish pipeline:
//!
//! 1. resolve the topic address (explicit project or the default)
//! 2. turn each envelope into a [`PubsubMessage`], moving the reserved
//!    `ordering_key` attribute into the message's ordering key
//! 3. send the whole batch in one call, retried by the [`RetryPolicy`]
//! 4. hand the broker acknowledgment back unchanged
//!
//! Configuration and validation failures are returned before any network
//! call. Transient failures are retried; after exhaustion the last one is
//! returned. Nothing is logged-and-swallowed.

use crate::config::PubSubConfig;
use crate::envelope::{Publishable, ORDERING_KEY_ATTRIBUTE};
use crate::error::{PubSubError, Result};
use crate::retry::RetryPolicy;
use crate::transport::{PubSubClient, PublishResponse, PubsubMessage, Transport};
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Publisher port
///
/// Object safe: batches are passed as trait objects so adapters can be
/// swapped behind `dyn MessagePublisher`.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    async fn publish_batch(
        &self,
        messages: &[&dyn Publishable],
        topic: &str,
    ) -> Result<PublishResponse>;
}

/// Per-call overrides for [`Publisher::publish_with`]
pub struct PublishOptions<'a, S> {
    pub project: Option<&'a str>,
    pub session: Option<&'a S>,
    pub timeout: Option<Duration>,
}

impl<S> Default for PublishOptions<'_, S> {
    fn default() -> Self {
        Self {
            project: None,
            session: None,
            timeout: None,
        }
    }
}

impl<'a, S> PublishOptions<'a, S> {
    pub fn project(mut self, project: &'a str) -> Self {
        self.project = Some(project);
        self
    }

    pub fn session(mut self, session: &'a S) -> Self {
        self.session = Some(session);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Convert an envelope into a broker-native message.
///
/// The `ordering_key` attribute becomes the ordering key (empty if absent)
/// and is left out of the forwarded attributes.
pub fn to_native_message<M: Publishable + ?Sized>(message: &M) -> Result<PubsubMessage> {
    let mut attributes = message.attributes().clone();
    let ordering_key = attributes.remove(ORDERING_KEY_ATTRIBUTE).unwrap_or_default();

    Ok(PubsubMessage {
        data: message.to_bytes()?,
        ordering_key,
        attributes,
    })
}

/// Retrying publisher over a [`Transport`]
pub struct Publisher<T: Transport = PubSubClient> {
    transport: T,
    retry: RetryPolicy,
    publish_timeout: Duration,
}

impl Publisher<PubSubClient> {
    /// Build a publisher backed by the Pub/Sub REST client.
    pub async fn connect(config: PubSubConfig) -> Result<Self> {
        config.validate()?;
        let retry = RetryPolicy::from_config(&config.retry);
        let publish_timeout = config.publish_timeout.as_duration();
        let client = PubSubClient::new(config).await?;

        Ok(Self::new(client, retry).with_publish_timeout(publish_timeout))
    }

    /// Build a publisher from environment-derived configuration.
    pub async fn from_env() -> Result<Self> {
        Self::connect(PubSubConfig::from_env()?).await
    }
}

impl<T: Transport> Publisher<T> {
    /// Default per-call timeout
    pub const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(transport: T, retry: RetryPolicy) -> Self {
        Self {
            transport,
            retry,
            publish_timeout: Self::DEFAULT_PUBLISH_TIMEOUT,
        }
    }

    pub fn with_publish_timeout(mut self, timeout: Duration) -> Self {
        self.publish_timeout = timeout;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn publish_timeout(&self) -> Duration {
        self.publish_timeout
    }

    /// Publish a batch to `topic` in the default project.
    pub async fn publish<M: Publishable>(
        &self,
        messages: &[M],
        topic: &str,
    ) -> Result<PublishResponse> {
        self.publish_with(messages, topic, PublishOptions::default())
            .await
    }

    /// Publish a batch with per-call project, session or timeout.
    ///
    /// The batch is sent as one broker call, in input order. An empty batch
    /// is rejected.
    pub async fn publish_with<M: Publishable>(
        &self,
        messages: &[M],
        topic: &str,
        options: PublishOptions<'_, T::Session>,
    ) -> Result<PublishResponse> {
        if messages.is_empty() {
            return Err(PubSubError::Validation(
                "cannot publish an empty batch".to_string(),
            ));
        }

        let topic_address = self.transport.resolve_topic(topic, options.project)?;
        let native = messages
            .iter()
            .map(to_native_message)
            .collect::<Result<Vec<_>>>()?;
        let timeout = options.timeout.unwrap_or(self.publish_timeout);

        let transport = &self.transport;
        let address = topic_address.as_str();
        let batch = native.as_slice();
        let session = options.session;

        let ack = self
            .retry
            .run(move || transport.publish_once(address, batch, session, timeout))
            .await?;

        tracing::info!(
            topic = %topic_address,
            count = batch.len(),
            message_ids = ?ack.message_ids,
            "Batch published to Pub/Sub"
        );

        Ok(ack)
    }

    /// Release the transport.
    pub async fn close(&self) -> Result<()> {
        self.transport.close().await
    }

    /// Run `f` with a shared handle to this publisher and close the
    /// transport afterwards, whether `f` succeeds, fails or panics.
    pub async fn scoped<F, Fut, R>(self, f: F) -> Result<R>
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let publisher = Arc::new(self);
        let outcome = AssertUnwindSafe(f(publisher.clone())).catch_unwind().await;
        let closed = publisher.close().await;

        match outcome {
            Ok(result) => {
                let value = result?;
                closed?;
                Ok(value)
            }
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

#[async_trait]
impl<T: Transport> MessagePublisher for Publisher<T> {
    async fn publish_batch(
        &self,
        messages: &[&dyn Publishable],
        topic: &str,
    ) -> Result<PublishResponse> {
        self.publish(messages, topic).await
    }
}
