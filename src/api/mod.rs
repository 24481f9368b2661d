use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use futures_util::{stream::Stream, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use tokio::sync::mpsc;
use tokio_stream::wrappers::BroadcastStream;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::hub::Hub;
use crate::transport::{self, ConnectionTable};

const SERVICE_NAME: &str = "coordination-hub";
const SERVICE_VERSION: &str = "0.1.0";

const ROUTE_HEALTH: &str = "/health";
const ROUTE_AGENTS: &str = "/api/agents";
const ROUTE_TASKS: &str = "/api/tasks";
const ROUTE_CONFLICTS: &str = "/api/conflicts";
const ROUTE_AGENT_WS: &str = "/agents/ws";
const ROUTE_EVENTS: &str = "/events";

#[derive(Clone)]
pub struct ApiServer {
    config: Config,
    hub: Hub,
    connections: ConnectionTable,
}

impl ApiServer {
    pub fn new(config: Config, hub: Hub) -> Self {
        Self {
            config,
            hub,
            connections: ConnectionTable::new(),
        }
    }

    pub async fn run(&self) -> crate::Result<()> {
        let app = self.build_router();

        let listener = tokio::net::TcpListener::bind(format!("{}:{}", self.config.host, self.config.port))
            .await
            .map_err(anyhow::Error::from)?;

        info!("API server listening on {}:{}", self.config.host, self.config.port);

        axum::serve(listener, app.into_make_service())
            .await
            .map_err(anyhow::Error::from)?;

        Ok(())
    }

    pub fn build_router(&self) -> Router {
        let cors_layer = CorsLayer::new()
            .allow_origin(
                self.config
                    .allowed_origins
                    .iter()
                    .filter_map(|origin| origin.parse().ok())
                    .collect::<Vec<_>>(),
            )
            .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
            .allow_headers([axum::http::header::CONTENT_TYPE]);

        Router::new()
            .route(ROUTE_HEALTH, get(health_check))
            .route(ROUTE_AGENTS, get(get_all_agents))
            .route(ROUTE_TASKS, get(get_all_tasks))
            .route(ROUTE_CONFLICTS, get(get_conflicts))
            .route(ROUTE_AGENT_WS, get(agent_websocket))
            .route(ROUTE_EVENTS, get(event_stream))
            .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(cors_layer))
            .with_state(self.clone())
    }
}

async fn health_check(State(api): State<ApiServer>) -> Json<serde_json::Value> {
    let agents = api.hub.registry.all().await;
    let tasks = api.hub.coordinator.all().await;
    Json(json!({
        "status": "healthy",
        "service": SERVICE_NAME,
        "version": SERVICE_VERSION,
        "timestamp": crate::clock::now(),
        "agents": agents.len(),
        "tasks": tasks.len(),
    }))
}

async fn get_all_agents(State(api): State<ApiServer>) -> Json<Vec<crate::models::Agent>> {
    Json(api.hub.registry.all().await)
}

async fn get_all_tasks(State(api): State<ApiServer>) -> Json<Vec<crate::models::Task>> {
    Json(api.hub.coordinator.all().await)
}

/// Triggers the Conflict Detector's on-request pass (§4.3) over the
/// current snapshot and returns the findings. Also fires the
/// `conflicts_detected`/`conflict_resolution_started`/`conflict_resolved`
/// broadcast sequence on every open channel and observer stream, same
/// as the `detect_conflicts` WebSocket message.
async fn get_conflicts(State(api): State<ApiServer>) -> Json<Vec<crate::models::Conflict>> {
    let tasks = api.hub.coordinator.all().await;
    let agents = api.hub.registry.all().await;
    let conflicts =
        crate::conflict::detect_and_report(&tasks, &agents, api.hub.events.clone()).await;
    Json(conflicts)
}

async fn agent_websocket(ws: WebSocketUpgrade, State(api): State<ApiServer>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_agent_socket(socket, api))
}

/// One task per connection: forwards broadcast events out, dispatches
/// inbound frames through `transport::dispatch`. Disconnect (either
/// direction closing) drops the connection table entry and marks the
/// owning agent offline, if one registered on this token.
async fn handle_agent_socket(socket: WebSocket, api: ApiServer) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<serde_json::Value>();
    let token = api.connections.insert(outbound_tx).await;

    let mut broadcast_rx = api.hub.events.subscribe();
    let writer_token = token.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                direct = outbound_rx.recv() => {
                    match direct {
                        Some(value) => {
                            if ws_sender.send(Message::Text(value.to_string().into())).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                event = broadcast_rx.recv() => {
                    match event {
                        Ok(event) => {
                            let payload = serde_json::to_string(&event).unwrap_or_default();
                            if ws_sender.send(Message::Text(payload.into())).await.is_err() {
                                break;
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    }
                }
            }
        }
        let _ = writer_token;
    });

    while let Some(Ok(message)) = ws_receiver.next().await {
        if let Message::Text(text) = message {
            transport::dispatch(&api.hub, &api.connections, &token, &text).await;
        }
    }

    writer.abort();
    api.connections.remove(&token).await;
    if let Err(err) = api.hub.registry.handle_disconnect(&token).await {
        warn!(token = %token, error = %err, "disconnect handler found no matching agent");
    }
}

#[derive(Debug, Deserialize)]
struct EventStreamParams {
    #[serde(default)]
    replay: usize,
}

async fn event_stream(
    State(api): State<ApiServer>,
    Query(params): Query<EventStreamParams>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let backlog = api.hub.events.recent(params.replay.min(1000));
    let backlog_stream = futures_util::stream::iter(
        backlog
            .into_iter()
            .map(|event| Ok(Event::default().json_data(&event).unwrap_or_else(|_| Event::default()))),
    );

    let live_stream = BroadcastStream::new(api.hub.events.subscribe()).filter_map(|item| async move {
        match item {
            Ok(event) => Some(Ok(Event::default().json_data(&event).unwrap_or_else(|_| Event::default()))),
            Err(_) => None,
        }
    });

    Sse::new(backlog_stream.chain(live_stream)).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_config() -> Config {
        Config {
            host: "127.0.0.1".into(),
            port: 0,
            liveness_sweep_secs: 60,
            stale_agent_secs: 300,
            event_ring_capacity: 100,
            allowed_origins: vec!["http://localhost:3000".into()],
        }
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_check_reports_agent_and_task_counts() {
        let hub = Hub::new(&test_config());
        hub.registry.register("A1".into(), None, Default::default(), None).await;
        let server = ApiServer::new(test_config(), hub);

        let response = server
            .build_router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["agents"], 1);
    }

    #[tokio::test]
    async fn conflicts_route_reports_a_soft_capability_mismatch() {
        let hub = Hub::new(&test_config());
        hub.registry.register("A1".into(), None, ["python".to_string()].into(), None).await;
        let task = hub
            .coordinator
            .create_task(
                "needs sql too".into(),
                ["python".to_string(), "sql".to_string()].into(),
                crate::models::Priority::Medium,
                vec![],
            )
            .await
            .unwrap();
        hub.coordinator.assign_optimal(&task.id).await.unwrap();
        let server = ApiServer::new(test_config(), hub);

        let response = server
            .build_router()
            .oneshot(Request::builder().uri("/api/conflicts").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        let conflicts = body.as_array().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0]["type"], "capability_mismatch");
    }

    #[tokio::test]
    async fn agents_and_tasks_routes_return_full_snapshots() {
        let hub = Hub::new(&test_config());
        hub.registry.register("A1".into(), None, Default::default(), None).await;
        hub.coordinator
            .create_task("work".into(), Default::default(), crate::models::Priority::Low, vec![])
            .await
            .unwrap();
        let server = ApiServer::new(test_config(), hub);
        let router = server.build_router();

        let agents_response = router
            .clone()
            .oneshot(Request::builder().uri("/api/agents").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let agents = body_json(agents_response).await;
        assert_eq!(agents.as_array().unwrap().len(), 1);

        let tasks_response = router
            .oneshot(Request::builder().uri("/api/tasks").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let tasks = body_json(tasks_response).await;
        assert_eq!(tasks.as_array().unwrap().len(), 1);
    }
}
