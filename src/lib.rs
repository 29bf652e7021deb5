//! Google Cloud Pub/Sub Adapter for Hexagonal Architecture
//!
//! This adapter publishes strongly-typed commands and events to Pub/Sub
//! topics, with retries on transient broker unavailability.
//!
//! # Features
//!
//! - **Versioned Envelopes**: Every message carries an id, a UTC timestamp, a
//!   schema version and its type name
//! - **Batch Publishing**: One broker call per batch, input order preserved
//! - **Ordering Keys**: The reserved `ordering_key` attribute becomes the
//!   Pub/Sub ordering key
//! - **Retry Logic**: Bounded exponential backoff with jitter on transient
//!   failures only
//! - **Decoder Registry**: Decode envelopes by type and schema version
//! - **Result Retrieval**: Read workflow `result.json` from file, HTTP or GCS
//!   stores
//!
//! # Example: Publishing a command
//!
//! ```rust,no_run
//! use hexagonal_adapter_pubsub::{
//!     PubSubConfig, Publisher, RunWorkflowCommand, RunWorkflowParams,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PubSubConfig::from_env()?.with_project("ecoscope-dev");
//!     let publisher = Publisher::connect(config).await?;
//!
//!     let command = RunWorkflowCommand::new(RunWorkflowParams::new(
//!         "https://repo.prefix.dev/ecoscope-workflows/",
//!         "custom-events-workflow-pkg",
//!         "0.0.65",
//!         "run",
//!     ))?
//!     .with_ordering_key("user-42");
//!
//!     let ack = publisher.publish(&[command], "workflow-requests").await?;
//!     println!("published {:?}", ack.message_ids);
//!
//!     publisher.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Example: Scoped use
//!
//! ```rust,no_run
//! use hexagonal_adapter_pubsub::{Command, Envelope, PubSubConfig, Publisher};
//!
//! # async fn run() -> hexagonal_adapter_pubsub::Result<()> {
//! let publisher = Publisher::connect(PubSubConfig::from_env()?).await?;
//! publisher
//!     .scoped(|p| async move {
//!         let ping = Envelope::<Command>::from_value(serde_json::json!({"ping": true}))?;
//!         p.publish(&[ping], "heartbeats").await
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod auth;
pub mod commands;
pub mod config;
pub mod envelope;
pub mod error;
pub mod publisher;
pub mod registry;
pub mod results;
pub mod retry;
pub mod transport;

// Re-exports
pub use auth::TokenProvider;
pub use commands::{InvokerType, RunWorkflow, RunWorkflowCommand, RunWorkflowParams};
pub use config::{PubSubConfig, RequestTimeout, RetryConfig};
pub use envelope::{
    Command, Envelope, EnvelopeHeader, Event, MessageKind, MessageType, Payload, Publishable,
    ORDERING_KEY_ATTRIBUTE,
};
pub use error::{ErrorKind, PubSubError, Result};
pub use publisher::{to_native_message, MessagePublisher, PublishOptions, Publisher};
pub use registry::MessageRegistry;
pub use results::{get_results_json, store_from_url, ObjectStore};
pub use retry::RetryPolicy;
pub use transport::{topic_path, PubSubClient, PublishResponse, PubsubMessage, Transport};
