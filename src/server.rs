use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::Stream;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

use crate::agent::Agent;
use crate::chain::{ChainDefinition, ChainExecutor, SUMMARY_UNAVAILABLE};
use crate::config::AppConfig;
use crate::error::{ErrorKind, FlowError, Result};
use crate::llm::LanguageModel;
use crate::registry::{ToolProvider, ToolRegistry};
use crate::summarize::Summarizer;

/// Shared service state behind the HTTP facade. Cheap to clone; chain
/// definitions and providers are immutable once the service is built.
pub struct AgentService<M: LanguageModel + 'static> {
    providers: Arc<Vec<Arc<dyn ToolProvider>>>,
    chains: Arc<HashMap<String, Arc<ChainDefinition>>>,
    model: Arc<M>,
    executor: ChainExecutor,
    summarizer: Arc<Summarizer<M>>,
    events: broadcast::Sender<String>,
}

impl<M: LanguageModel + 'static> Clone for AgentService<M> {
    fn clone(&self) -> Self {
        Self {
            providers: Arc::clone(&self.providers),
            chains: Arc::clone(&self.chains),
            model: Arc::clone(&self.model),
            executor: self.executor.clone(),
            summarizer: Arc::clone(&self.summarizer),
            events: self.events.clone(),
        }
    }
}

impl<M: LanguageModel + 'static> AgentService<M> {
    pub fn new(
        config: &AppConfig,
        providers: Vec<Arc<dyn ToolProvider>>,
        chains: HashMap<String, Arc<ChainDefinition>>,
        model: Arc<M>,
    ) -> Self {
        let (events, _) = broadcast::channel(256);
        let step_timeout = std::time::Duration::from_secs(config.chain.step_timeout_secs);
        let generation_timeout = std::time::Duration::from_secs(config.generation.timeout_secs);
        Self {
            providers: Arc::new(providers),
            chains: Arc::new(chains),
            model: Arc::clone(&model),
            executor: ChainExecutor::new(step_timeout).with_events(events.clone()),
            summarizer: Arc::new(Summarizer::new(model, generation_timeout)),
            events,
        }
    }

    pub fn router(self) -> Router {
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/events", get(stream_events::<M>))
            .route("/api/v1/agent/tools", get(list_tools::<M>))
            .route("/api/v1/agent/prompt", post(run_prompt::<M>))
            .route("/api/v1/agent/chain", post(run_chain::<M>))
            .with_state(self)
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        tracing::info!(%addr, "listening");
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, self.router().into_make_service())
            .await
            .map_err(|err| FlowError::Protocol(format!("server error: {err}")))?;
        Ok(())
    }

    async fn discover(&self) -> Result<ToolRegistry> {
        ToolRegistry::discover(&self.providers).await
    }
}

#[derive(Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Serialize)]
pub struct PromptResponse {
    pub response: String,
}

#[derive(Deserialize)]
pub struct ChainRequest {
    /// Name of a registered chain; the service default is used when absent.
    #[serde(default)]
    pub chain: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Serialize)]
pub struct ChainResponse {
    pub run_id: Uuid,
    pub response: String,
    pub payload: Map<String, Value>,
}

const DEFAULT_CHAIN: &str = "company_lookup";

async fn list_tools<M: LanguageModel + 'static>(
    State(state): State<AgentService<M>>,
) -> Response {
    match state.discover().await {
        Ok(registry) => Json(registry.descriptors()).into_response(),
        Err(err) => error_response(err),
    }
}

async fn run_prompt<M: LanguageModel + 'static>(
    State(state): State<AgentService<M>>,
    Json(req): Json<PromptRequest>,
) -> Response {
    let registry = match state.discover().await {
        Ok(registry) => registry,
        Err(err) => return error_response(err),
    };

    let agent = Agent::new(Arc::clone(&state.model));
    match agent.respond(&registry, req.prompt, req.model.as_deref()).await {
        Ok(response) => Json(PromptResponse { response }).into_response(),
        Err(err) => error_response(err),
    }
}

async fn run_chain<M: LanguageModel + 'static>(
    State(state): State<AgentService<M>>,
    Json(req): Json<ChainRequest>,
) -> Response {
    let name = req.chain.as_deref().unwrap_or(DEFAULT_CHAIN);
    let chain = match state.chains.get(name) {
        Some(chain) => Arc::clone(chain),
        None => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({"error": format!("unknown chain `{name}`")})),
            )
                .into_response()
        }
    };

    let run_id = Uuid::new_v4();
    let _ = state.events.send(format!("chain:{name}:run:{run_id}"));
    tracing::info!(chain = name, %run_id, "chain run accepted");

    let registry = match state.discover().await {
        Ok(registry) => registry,
        Err(err) => return error_response(err),
    };

    match state
        .executor
        .run(&chain, &registry, &state.summarizer, req.model.as_deref())
        .await
    {
        Ok(outcome) => Json(ChainResponse {
            run_id,
            response: outcome
                .summary
                .unwrap_or_else(|| SUMMARY_UNAVAILABLE.to_string()),
            payload: outcome.payload,
        })
        .into_response(),
        Err(err) => error_response(err),
    }
}

async fn stream_events<M: LanguageModel + 'static>(
    State(state): State<AgentService<M>>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| async move {
        match msg {
            Ok(line) => Some(Ok::<Event, Infallible>(Event::default().data(line))),
            Err(_) => None,
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Map an error to a structured response. Full details go to the log; the
/// caller sees the kind, the step index and the tool name at most.
fn error_response(err: FlowError) -> Response {
    tracing::error!(error = %err, "request failed");

    let kind = err.kind();
    let status = match kind {
        ErrorKind::Binding | ErrorKind::Protocol => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_GATEWAY,
    };

    let mut body = json!({
        "kind": kind,
        "error": safe_message(&err),
    });
    if let FlowError::Step { step, tool, .. } = &err {
        body["step"] = json!(step);
        body["tool"] = json!(tool);
    }
    (status, Json(body)).into_response()
}

fn safe_message(err: &FlowError) -> String {
    match err {
        FlowError::Discovery(_) => "tool discovery failed".into(),
        FlowError::Generation(_) => "text generation failed".into(),
        FlowError::ToolInvocation { name, .. } => format!("tool `{name}` invocation failed"),
        FlowError::Io(_) | FlowError::Serde(_) => "internal error".into(),
        other => other.to_string(),
    }
}
