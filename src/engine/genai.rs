//! GenAI-backed engine provider
//!
//! Serves completions from a model behind the `genai` crate (a local Ollama
//! daemon by default, or any hosted provider it supports). In worker mode the
//! engine is hosted on a [`WorkerEngine`] thread; in main-thread mode it runs
//! directly on the caller's runtime.
//!
//! Creating an engine only succeeds once the provider's credentials are set
//! and a one-token warm-up completion came back, so an unreachable daemon or
//! a missing model fails the load stage instead of the first request.

use super::provider::{EngineHandle, EngineProvider};
use super::types::{
    ChatMessage, Completion, CompletionRequest, ExecutionMode, GenerateOptions, MessageRole,
};
use super::worker::WorkerEngine;
use crate::error::EngineError;
use crate::progress::ProgressReporter;
use async_trait::async_trait;
use futures_util::StreamExt;
use genai::adapter::AdapterKind;
use genai::chat::{
    ChatMessage as GenAIChatMessage, ChatOptions, ChatRequest as GenAIChatRequest,
    ChatStreamEvent,
};
use genai::resolver::{AuthData, Endpoint, ServiceTargetResolver};
use genai::{Client, ModelIden, ServiceTarget};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Engine provider backed by the `genai` client
#[derive(Debug, Clone)]
pub struct GenAIProvider {
    adapter: AdapterKind,
    timeout: Duration,
    endpoint: Option<String>,
}

impl GenAIProvider {
    pub fn new(adapter: AdapterKind, timeout: Duration) -> Self {
        Self {
            adapter,
            timeout,
            endpoint: None,
        }
    }

    /// Routes every request to a custom base URL
    pub fn with_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.endpoint = endpoint;
        self
    }
}

#[async_trait]
impl EngineProvider for GenAIProvider {
    async fn create_engine(
        &self,
        model_id: &str,
        mode: ExecutionMode,
        progress: ProgressReporter,
    ) -> Result<Arc<dyn EngineHandle>, EngineError> {
        progress.report(0.0, Some(&format!("Preparing {} ({})", model_id, mode)));

        if let Some(key_var) = missing_credentials(self.adapter) {
            debug!("Skipping {} - no credentials available", self.adapter.as_str());
            return Err(EngineError::load(
                model_id,
                format!("missing credentials: set {}", key_var),
            ));
        }

        let engine: Arc<dyn EngineHandle> = match mode {
            ExecutionMode::MainThread => Arc::new(GenAIEngine::new(
                self.adapter,
                model_id.to_string(),
                self.timeout,
                self.endpoint.clone(),
            )),
            ExecutionMode::Worker => {
                let adapter = self.adapter;
                let model = model_id.to_string();
                let timeout = self.timeout;
                let endpoint = self.endpoint.clone();
                let worker = WorkerEngine::spawn(model_id, move || async move {
                    Ok(Arc::new(GenAIEngine::new(adapter, model, timeout, endpoint))
                        as Arc<dyn EngineHandle>)
                })
                .await?;
                Arc::new(worker)
            }
        };

        progress.report(0.5, Some("Warming up"));
        warm_up(engine.as_ref()).await.map_err(|e| {
            EngineError::load(model_id, format!("warm-up request failed: {}", e))
        })?;
        info!("{} answered warm-up for {}", self.adapter.as_str(), model_id);

        progress.report(1.0, Some("Ready"));
        Ok(engine)
    }

    fn name(&self) -> &str {
        self.adapter.as_str()
    }
}

/// Name of the unset API key variable, when the provider needs one
fn missing_credentials(adapter: AdapterKind) -> Option<&'static str> {
    match adapter.default_key_env_name() {
        None => None,
        Some(key_var) if env::var(key_var).is_ok() => None,
        Some(key_var) => Some(key_var),
    }
}

/// Sends a one-token completion and waits for the full answer
async fn warm_up(engine: &dyn EngineHandle) -> Result<(), EngineError> {
    let request = CompletionRequest::new(vec![ChatMessage::user("ping")])
        .with_options(GenerateOptions::default().with_max_tokens(1));
    match engine.complete(request).await? {
        Completion::Text(_) => Ok(()),
        Completion::Stream(mut chunks) => {
            while let Some(chunk) = chunks.next().await {
                chunk?;
            }
            Ok(())
        }
    }
}

/// A single model served through `genai`
pub struct GenAIEngine {
    client: Client,
    model: String,
    adapter: AdapterKind,
    timeout: Duration,
}

impl GenAIEngine {
    pub fn new(
        adapter: AdapterKind,
        model: String,
        timeout: Duration,
        endpoint: Option<String>,
    ) -> Self {
        let client = match endpoint {
            Some(endpoint_url) => {
                debug!(
                    "Using custom endpoint for {}: {}",
                    adapter.as_str(),
                    endpoint_url
                );
                let model_clone = model.clone();
                let resolver = ServiceTargetResolver::from_resolver_fn(
                    move |_service_target: ServiceTarget| -> Result<ServiceTarget, genai::resolver::Error> {
                        let auth = match adapter.default_key_env_name() {
                            Some(api_key_var) => AuthData::from_env(api_key_var),
                            None => AuthData::from_single(""),
                        };
                        Ok(ServiceTarget {
                            endpoint: Endpoint::from_owned(endpoint_url.clone()),
                            auth,
                            model: ModelIden::new(adapter, &model_clone),
                        })
                    },
                );
                Client::builder()
                    .with_service_target_resolver(resolver)
                    .build()
            }
            None => Client::default(),
        };

        debug!(
            "Creating GenAI engine: adapter={}, model={}",
            adapter.as_str(),
            model
        );

        Self {
            client,
            model,
            adapter,
            timeout,
        }
    }

    fn convert_message(msg: &ChatMessage) -> GenAIChatMessage {
        match msg.role {
            MessageRole::System => GenAIChatMessage::system(&msg.content),
            MessageRole::User => GenAIChatMessage::user(&msg.content),
            MessageRole::Assistant => GenAIChatMessage::assistant(&msg.content),
        }
    }

    fn build_options(request: &CompletionRequest) -> ChatOptions {
        let mut options = ChatOptions::default();
        if let Some(max_tokens) = request.options.max_tokens {
            options = options.with_max_tokens(max_tokens);
        }
        if let Some(temperature) = request.options.temperature {
            options = options.with_temperature(temperature as f64);
        }
        if let Some(top_p) = request.options.top_p {
            options = options.with_top_p(top_p as f64);
        }
        if let Some(ref stop) = request.options.stop {
            options = options.with_stop_sequences(stop.clone());
        }
        options
    }

    fn timed_out(&self) -> EngineError {
        error!(
            "{} request timed out after {}s",
            self.adapter.as_str(),
            self.timeout.as_secs()
        );
        EngineError::completion(format!(
            "request timed out after {} seconds",
            self.timeout.as_secs()
        ))
    }
}

#[async_trait]
impl EngineHandle for GenAIEngine {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, EngineError> {
        let messages: Vec<GenAIChatMessage> =
            request.messages.iter().map(Self::convert_message).collect();
        let options = Self::build_options(&request);
        let chat_request = GenAIChatRequest::new(messages);

        if request.stream {
            let response = match tokio::time::timeout(
                self.timeout,
                self.client
                    .exec_chat_stream(&self.model, chat_request, Some(&options)),
            )
            .await
            {
                Ok(Ok(response)) => response,
                Ok(Err(e)) => {
                    error!("{} stream error: {}", self.adapter.as_str(), e);
                    return Err(EngineError::completion(format!(
                        "{} stream failed: {}",
                        self.adapter.as_str(),
                        e
                    )));
                }
                Err(_) => return Err(self.timed_out()),
            };

            let chunks = response.stream.filter_map(|event| async move {
                match event {
                    Ok(ChatStreamEvent::Chunk(chunk)) => Some(Ok(chunk.content)),
                    Ok(_) => None,
                    Err(e) => Some(Err(EngineError::completion(e.to_string()))),
                }
            });
            return Ok(Completion::Stream(chunks.boxed()));
        }

        let response = match tokio::time::timeout(
            self.timeout,
            self.client
                .exec_chat(&self.model, chat_request, Some(&options)),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!("{} API error: {}", self.adapter.as_str(), e);
                return Err(EngineError::completion(format!(
                    "{} request failed: {}",
                    self.adapter.as_str(),
                    e
                )));
            }
            Err(_) => return Err(self.timed_out()),
        };

        Ok(Completion::Text(
            response.first_text().unwrap_or_default().to_string(),
        ))
    }

    fn name(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for GenAIEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenAIEngine")
            .field("adapter", &self.adapter)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}
