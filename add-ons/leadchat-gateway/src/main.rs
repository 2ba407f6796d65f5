//! Axum-based widget gateway: session lifecycle, message dispatch, lead
//! listing, and per-chatbot widget configuration. Config-driven via CoreConfig.

use axum::{
    extract::{Json, Path, State},
    http::{Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use std::path::Path as StdPath;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use leadchat_core::{
    ConversationEngine, CoreConfig, EngineConfig, EngineReply, GeminiClient, MessageOutcome,
    MockCompletion, Mode, PersistenceGateway, MemoryFallbackStore, SheetsMirror, SledLeadStore,
    TextCompletion, TopicScript, WidgetConfig,
};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) config: Arc<CoreConfig>,
    pub(crate) store: Arc<PersistenceGateway>,
    pub(crate) llm: Arc<dyn TextCompletion>,
    pub(crate) sessions: Arc<DashMap<String, Arc<Mutex<ConversationEngine>>>>,
}

#[tokio::main]
async fn main() {
    // Load .env file if present (before any env::var calls)
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[leadchat-gateway] .env not loaded: {} (using system environment)", e);
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(CoreConfig::load().expect("load CoreConfig"));

    let lead_path = StdPath::new(&config.storage_path).join("leadchat_leads");
    let primary = Arc::new(SledLeadStore::open_path(&lead_path).expect("open lead store"));
    let mirror = config
        .sheets_webhook_url
        .as_deref()
        .filter(|url| !url.trim().is_empty())
        .map(|url| Arc::new(SheetsMirror::new(url)) as Arc<dyn leadchat_core::LeadBackend>);
    if mirror.is_none() {
        tracing::info!("sheets mirror not configured, running without it");
    }
    let store = Arc::new(PersistenceGateway::new(
        primary,
        mirror,
        Arc::new(MemoryFallbackStore::new()),
    ));

    let llm: Arc<dyn TextCompletion> = match config.llm_mode.as_str() {
        "live" => match GeminiClient::from_config(&config) {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::warn!(error = %e, "live llm_mode requested, falling back to mock");
                Arc::new(MockCompletion)
            }
        },
        _ => Arc::new(MockCompletion),
    };

    let sessions: Arc<DashMap<String, Arc<Mutex<ConversationEngine>>>> =
        Arc::new(DashMap::new());
    tokio::spawn(evict_sessions_loop(Arc::clone(&sessions)));

    let app = build_app(AppState {
        config: Arc::clone(&config),
        store,
        llm,
        sessions,
    });

    let port = config.port;
    let app_name = config.app_name.clone();
    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("{} listening on {}", app_name, addr);
    axum::serve(
        tokio::net::TcpListener::bind(addr).await.unwrap(),
        app,
    )
    .await
    .unwrap();
}

/// Completed sessions linger briefly so the post-completion handler can
/// still field a follow-up; abandoned in-progress sessions get a longer TTL.
const COMPLETED_SESSION_TTL: Duration = Duration::from_secs(10 * 60);
const IDLE_SESSION_TTL: Duration = Duration::from_secs(2 * 60 * 60);

async fn evict_sessions_loop(sessions: Arc<DashMap<String, Arc<Mutex<ConversationEngine>>>>) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        evict_expired(&sessions, COMPLETED_SESSION_TTL, IDLE_SESSION_TTL);
    }
}

/// One eviction pass. Busy sessions (engine lock held) are always kept.
fn evict_expired(
    sessions: &DashMap<String, Arc<Mutex<ConversationEngine>>>,
    completed_ttl: Duration,
    idle_ttl: Duration,
) {
    let before = sessions.len();
    sessions.retain(|_, engine| match engine.try_lock() {
        Ok(guard) => {
            let ttl = if guard.mode() == Mode::Complete { completed_ttl } else { idle_ttl };
            guard.idle_for() < ttl
        }
        Err(_) => true,
    });
    let evicted = before - sessions.len();
    if evicted > 0 {
        tracing::debug!(evicted, remaining = sessions.len(), "expired sessions evicted");
    }
}

fn build_app(state: AppState) -> Router {
    // The widget is embedded on arbitrary customer sites, so the API has to
    // accept cross-origin requests from anywhere.
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/session", post(create_session))
        .route("/api/v1/session/:session_id/message", post(post_message))
        .route("/api/v1/leads", get(list_leads))
        .route("/api/v1/widget/:chatbot_id/config", get(widget_config))
        .with_state(state)
        .layer(cors)
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "app": state.config.app_name,
        "llm_mode": state.config.llm_mode,
        "active_sessions": state.sessions.len(),
    }))
}

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    /// Raw `data-config` attribute value from the embed snippet, if any.
    #[serde(default)]
    data_config: Option<String>,
    /// Chatbot instance whose server-side widget config applies when no
    /// inline `data-config` is given.
    #[serde(default)]
    chatbot_id: Option<String>,
}

/// Starts a conversation: resolves the widget config (inline `data-config`
/// first, then the chatbot's server-side file, then defaults; malformed JSON
/// falls back to defaults), builds the engine, and returns the opening
/// messages.
async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> impl IntoResponse {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let widget = match request.data_config.as_deref() {
        Some(raw) => WidgetConfig::from_data_attr(raw).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "malformed data-config attribute, using defaults");
            WidgetConfig::default()
        }),
        None => {
            let chatbot_id = request
                .chatbot_id
                .as_deref()
                .unwrap_or(leadchat_core::DEFAULT_CHATBOT_ID);
            load_widget_file(chatbot_id).await.unwrap_or_default()
        }
    };

    let session_id = uuid::Uuid::new_v4().to_string();
    let mut engine = ConversationEngine::new(
        EngineConfig {
            session_id: session_id.clone(),
            welcome_message: state.config.welcome_message.clone(),
            business_context: state.config.business_context.clone(),
            knowledge_excerpt: state.config.knowledge_excerpt.clone(),
            fallback_phone: state.config.fallback_phone.clone(),
            debounce: Duration::from_millis(state.config.debounce_ms),
        },
        TopicScript::with_overrides(&widget.topic_overrides),
        Arc::clone(&state.llm),
        Arc::clone(&state.store),
    );
    let opening = engine.start();
    state
        .sessions
        .insert(session_id.clone(), Arc::new(Mutex::new(engine)));

    Json(json!({
        "session_id": session_id,
        "widget": widget,
        "reply": opening,
    }))
}

#[derive(Debug, Deserialize)]
struct MessageRequest {
    message: String,
}

/// Feeds one visitor message to a session's engine. A message that lands
/// while a previous one is still being processed is dropped, not queued.
async fn post_message(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Json(request): Json<MessageRequest>,
) -> impl IntoResponse {
    let engine = match state.sessions.get(&session_id) {
        Some(entry) => Arc::clone(entry.value()),
        None => {
            return (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "unknown session" })),
            )
                .into_response();
        }
    };

    let mut guard = match engine.try_lock() {
        Ok(guard) => guard,
        Err(_) => {
            tracing::debug!(%session_id, "message dropped, session busy");
            return Json(json!({ "dropped": true })).into_response();
        }
    };

    match guard.handle_message(&request.message).await {
        MessageOutcome::Reply(reply) => Json(message_body(reply)).into_response(),
        MessageOutcome::Dropped => Json(json!({ "dropped": true })).into_response(),
    }
}

fn message_body(reply: EngineReply) -> serde_json::Value {
    json!({ "dropped": false, "reply": reply })
}

async fn list_leads(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.load_leads().await {
        Ok(leads) => Json(leads).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "lead listing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// The id is restricted to a safe character set so a crafted id can never
/// escape the widgets directory.
fn valid_chatbot_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Reads `config/widgets/{id}.json`; `None` for invalid ids, missing files,
/// or unparseable contents.
async fn load_widget_file(chatbot_id: &str) -> Option<WidgetConfig> {
    if !valid_chatbot_id(chatbot_id) {
        return None;
    }
    let path = format!("config/widgets/{}.json", chatbot_id);
    let raw = tokio::fs::read_to_string(&path).await.ok()?;
    match WidgetConfig::from_data_attr(&raw) {
        Ok(widget) => Some(widget),
        Err(e) => {
            tracing::warn!(%chatbot_id, error = %e, "widget config file unreadable, using defaults");
            None
        }
    }
}

/// Per-chatbot widget configuration for the embed snippet. Serves the
/// built-in defaults when no file exists for the id.
async fn widget_config(Path(chatbot_id): Path<String>) -> impl IntoResponse {
    if !valid_chatbot_id(&chatbot_id) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid chatbot id" })),
        )
            .into_response();
    }
    let widget = load_widget_file(&chatbot_id).await.unwrap_or_default();
    Json(widget).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_config() -> CoreConfig {
        CoreConfig {
            app_name: "Test Gateway".to_string(),
            port: 8010,
            storage_path: "./data".to_string(),
            llm_mode: "mock".to_string(),
            llm_api_url: None,
            llm_api_key: None,
            sheets_webhook_url: None,
            fallback_phone: "(631) 555-7100".to_string(),
            debounce_ms: 0,
            welcome_message: "Hi! I can walk you through our pool care service.".to_string(),
            business_context: "Harbor Pool Care test context.".to_string(),
            knowledge_excerpt: String::new(),
        }
    }

    fn test_state() -> AppState {
        AppState {
            config: Arc::new(test_config()),
            store: Arc::new(PersistenceGateway::new(
                Arc::new(MemoryFallbackStore::new()),
                None,
                Arc::new(MemoryFallbackStore::new()),
            )),
            llm: Arc::new(MockCompletion),
            sessions: Arc::new(DashMap::new()),
        }
    }

    async fn body_json(res: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_reports_identity_and_mode() {
        let app = build_app(test_state());
        let res = app
            .oneshot(Request::builder().uri("/api/v1/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["status"], "ok");
        assert_eq!(json["app"], "Test Gateway");
        assert_eq!(json["llm_mode"], "mock");
    }

    #[tokio::test]
    async fn session_create_then_message_advances_the_script() {
        let app = build_app(test_state());

        let res = app
            .clone()
            .oneshot(post_json("/api/v1/session", "{}"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let created = body_json(res).await;
        let session_id = created["session_id"].as_str().unwrap().to_string();
        let messages = created["reply"]["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 3, "greeting + static info + question");
        assert!(messages[2].as_str().unwrap().contains("Where is your pool located?"));

        let res = app
            .clone()
            .oneshot(post_json(
                &format!("/api/v1/session/{}/message", session_id),
                r#"{ "message": "Southampton" }"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let reply = body_json(res).await;
        assert_eq!(reply["dropped"], false);
        assert!(reply["reply"]["messages"][0]
            .as_str()
            .unwrap()
            .contains("Any questions about"));
        assert_eq!(reply["reply"]["quick_replies"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn message_racing_an_in_flight_one_is_dropped() {
        let state = test_state();
        let app = build_app(state.clone());

        let res = app
            .clone()
            .oneshot(post_json("/api/v1/session", "{}"))
            .await
            .unwrap();
        let created = body_json(res).await;
        let session_id = created["session_id"].as_str().unwrap().to_string();

        // Hold the engine lock, as an in-flight message would.
        let engine = Arc::clone(state.sessions.get(&session_id).unwrap().value());
        let _busy = engine.lock().await;

        let res = app
            .oneshot(post_json(
                &format!("/api/v1/session/{}/message", session_id),
                r#"{ "message": "Southampton" }"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["dropped"], true);
        assert!(json.get("reply").is_none());
    }

    #[tokio::test]
    async fn eviction_pass_removes_idle_sessions_but_keeps_fresh_and_busy_ones() {
        let state = test_state();
        let app = build_app(state.clone());

        app.clone()
            .oneshot(post_json("/api/v1/session", "{}"))
            .await
            .unwrap();
        assert_eq!(state.sessions.len(), 1);

        let hour = Duration::from_secs(3600);
        evict_expired(&state.sessions, hour, hour);
        assert_eq!(state.sessions.len(), 1, "fresh session must survive");

        evict_expired(&state.sessions, Duration::ZERO, Duration::ZERO);
        assert_eq!(state.sessions.len(), 0, "expired session must be removed");

        let res = app
            .oneshot(post_json("/api/v1/session", "{}"))
            .await
            .unwrap();
        let created = body_json(res).await;
        let session_id = created["session_id"].as_str().unwrap().to_string();
        let engine = Arc::clone(state.sessions.get(&session_id).unwrap().value());
        let _busy = engine.lock().await;
        evict_expired(&state.sessions, Duration::ZERO, Duration::ZERO);
        assert_eq!(state.sessions.len(), 1, "busy session must never be evicted");
    }

    #[tokio::test]
    async fn message_to_unknown_session_is_404() {
        let app = build_app(test_state());
        let res = app
            .oneshot(post_json(
                "/api/v1/session/no-such-session/message",
                r#"{ "message": "hello" }"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_embed_config_falls_back_to_defaults() {
        let app = build_app(test_state());
        let res = app
            .oneshot(post_json(
                "/api/v1/session",
                r#"{ "data_config": "{definitely not json" }"#,
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let created = body_json(res).await;
        assert_eq!(created["widget"]["position"], "bottom-right");
        assert_eq!(created["widget"]["primary_color"], "#0b7285");
    }

    #[tokio::test]
    async fn embed_config_topic_override_changes_the_first_question() {
        let app = build_app(test_state());
        let data_config = serde_json::to_string(
            r#"{ "topic_overrides": [ { "id": "WHERE", "question": "Which town is your pool in?" } ] }"#,
        )
        .unwrap();
        let res = app
            .oneshot(post_json(
                "/api/v1/session",
                &format!(r#"{{ "data_config": {} }}"#, data_config),
            ))
            .await
            .unwrap();
        let created = body_json(res).await;
        let messages = created["reply"]["messages"].as_array().unwrap();
        assert!(messages[2].as_str().unwrap().contains("Which town is your pool in?"));
    }

    #[tokio::test]
    async fn leads_endpoint_lists_an_empty_store() {
        let app = build_app(test_state());
        let res = app
            .oneshot(Request::builder().uri("/api/v1/leads").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await.as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn widget_config_rejects_unsafe_ids() {
        let app = build_app(test_state());
        let res = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/v1/widget/bad!id/config")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app
            .oneshot(
                Request::builder()
                    .uri("/api/v1/widget/default/config")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let json = body_json(res).await;
        assert_eq!(json["animation"], "slide-up");
    }
}
