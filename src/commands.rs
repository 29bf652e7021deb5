//! Workflow commands

use crate::envelope::{Envelope, MessageKind, MessageType, Payload};
use crate::error::{PubSubError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Where a workflow run is executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvokerType {
    #[default]
    #[serde(rename = "BlockingLocalSubprocessInvoker")]
    BlockingSubprocess,
    #[serde(rename = "CloudBatchInvoker")]
    CloudBatch,
}

/// Parameters of a workflow run: the conda package that provides the
/// workflow and the command to invoke in it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunWorkflowParams {
    pub conda_channel: String,
    pub conda_package: String,
    pub conda_package_version: String,
    #[serde(default)]
    pub invoker_type: InvokerType,
    #[serde(default)]
    pub invoker_kwargs: Map<String, Value>,
    pub command: String,
}

impl RunWorkflowParams {
    pub fn new(
        conda_channel: impl Into<String>,
        conda_package: impl Into<String>,
        conda_package_version: impl Into<String>,
        command: impl Into<String>,
    ) -> Self {
        Self {
            conda_channel: conda_channel.into(),
            conda_package: conda_package.into(),
            conda_package_version: conda_package_version.into(),
            invoker_type: InvokerType::default(),
            invoker_kwargs: Map::new(),
            command: command.into(),
        }
    }

    pub fn with_invoker_type(mut self, invoker_type: InvokerType) -> Self {
        self.invoker_type = invoker_type;
        self
    }

    pub fn with_invoker_kwarg(mut self, key: impl Into<String>, value: Value) -> Self {
        self.invoker_kwargs.insert(key.into(), value);
        self
    }
}

impl Payload for RunWorkflowParams {
    fn validate(&self) -> Result<()> {
        for (field, value) in [
            ("conda_channel", &self.conda_channel),
            ("conda_package", &self.conda_package),
            ("conda_package_version", &self.conda_package_version),
            ("command", &self.command),
        ] {
            if value.trim().is_empty() {
                return Err(PubSubError::Validation(format!(
                    "RunWorkflow.{field} cannot be empty"
                )));
            }
        }
        Ok(())
    }
}

/// Ask a worker to run a workflow
#[derive(Debug, Clone, Copy)]
pub struct RunWorkflow;

impl MessageType for RunWorkflow {
    const NAME: &'static str = "RunWorkflow";
    const KIND: MessageKind = MessageKind::Command;
    type Payload = RunWorkflowParams;
}

pub type RunWorkflowCommand = Envelope<RunWorkflow>;
