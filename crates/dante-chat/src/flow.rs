//! Conversational flow engine client.
//!
//! Posts one user utterance to `{host}/api/v1/run/{flow_id}` and returns
//! the reply text. The flow id is chosen by the session's agent type.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use dante_core::config::ClientSettings;
use dante_core::types::AgentType;

use crate::error::FlowError;
use crate::extractor::{ExtractedReply, ReplyExtractor};

/// Anything that turns an utterance into a reply.
#[async_trait]
pub trait FlowEngine: Send + Sync {
    async fn run(
        &self,
        input: &str,
        session_id: &str,
        agent: AgentType,
    ) -> Result<String, FlowError>;
}

#[derive(Debug, Serialize)]
struct FlowRequest<'a> {
    input_value: &'a str,
    input_type: &'static str,
    output_type: &'static str,
    session_id: &'a str,
}

/// reqwest-backed [`FlowEngine`].
#[derive(Debug, Clone)]
pub struct HttpFlowClient {
    client: reqwest::Client,
    host: String,
    flow_id: String,
    notarial_flow_id: Option<String>,
    api_key: Option<String>,
}

impl HttpFlowClient {
    /// Build a client from resolved settings. A zero timeout disables it.
    pub fn new(settings: &ClientSettings) -> Result<Self, FlowError> {
        let mut builder = reqwest::Client::builder();
        if settings.flow_timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(settings.flow_timeout_secs));
        }
        let client = builder
            .build()
            .map_err(|e| FlowError::Transport(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            host: settings.flow_host.trim_end_matches('/').to_string(),
            flow_id: settings.flow_id.clone(),
            notarial_flow_id: settings.notarial_flow_id.clone(),
            api_key: settings.flow_api_key.clone(),
        })
    }

    /// Run endpoint for the given agent.
    pub fn endpoint(&self, agent: AgentType) -> String {
        let flow_id = match agent {
            AgentType::Notarial => self.notarial_flow_id.as_deref().unwrap_or(&self.flow_id),
            AgentType::Registral => &self.flow_id,
        };
        format!("{}/api/v1/run/{}", self.host, flow_id)
    }
}

#[async_trait]
impl FlowEngine for HttpFlowClient {
    async fn run(
        &self,
        input: &str,
        session_id: &str,
        agent: AgentType,
    ) -> Result<String, FlowError> {
        let body = FlowRequest {
            input_value: input,
            input_type: "chat",
            output_type: "chat",
            session_id,
        };

        let mut request = self
            .client
            .post(self.endpoint(agent))
            .header("content-type", "application/json")
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                FlowError::Timeout
            } else {
                FlowError::Transport(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read flow error body".to_string());
            warn!(status = status.as_u16(), agent = %agent, "Flow engine returned an error");
            return Err(FlowError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let value: Value = response
            .json()
            .await
            .map_err(|err| FlowError::InvalidJson(err.to_string()))?;

        match ReplyExtractor::extract(&value) {
            ExtractedReply::Found { text, strategy } => {
                debug!(strategy = ?strategy, agent = %agent, "Flow reply extracted");
                Ok(text)
            }
            ExtractedReply::Unrecognized => {
                warn!(agent = %agent, "Flow response in unrecognized format");
                Err(FlowError::Unrecognized)
            }
        }
    }
}
