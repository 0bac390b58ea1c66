//! HTTP front end.
//!
//! A single `POST /chat` route answering `{"message": "...", "session_id": "..."}` with
//! `{"response": "...", "session_id": "..."}`. Every session starts from a clone of one template
//! conversation that was seeded and acknowledged at startup, so the corpus is only acknowledged
//! once per process.
//!
//! A session is stored after its first successful exchange. The table holds at most
//! [`DEFAULT_MAX_SESSIONS`] sessions unless configured otherwise (see
//! [`ServerState::max_sessions`]) and evicts the least recently used one when full.

use std::{collections::HashMap, sync::Arc};

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use uuid::Uuid;

use crate::{
    Api,
    config::DEFAULT_MAX_SESSIONS,
    conversation::Conversation,
    driver,
    exchange::{AsyncTransport, ExchangeError},
    retry::RetryPolicy,
};

/// Error text for requests without a usable message.
pub const NO_MESSAGE: &str = "No message provided";

type Session = Arc<Mutex<Conversation>>;

/// Sessions by id, bounded to a capacity. The least recently used session is evicted when a new
/// one does not fit.
struct SessionTable {
    capacity: usize,
    clock: u64,
    entries: HashMap<String, SessionEntry>,
}

struct SessionEntry {
    session: Session,
    last_used: u64,
}

impl SessionTable {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            clock: 0,
            entries: HashMap::new(),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Returns the session and marks it as used.
    fn get(&mut self, id: &str) -> Option<Session> {
        let now = self.tick();
        let entry = self.entries.get_mut(id)?;
        entry.last_used = now;
        Some(entry.session.clone())
    }

    /// Stores a new session. If another request created the same session in the meantime, that
    /// one is kept.
    fn insert(&mut self, id: String, conversation: Conversation) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }

        if self.entries.len() >= self.capacity {
            self.evict_least_recent();
        }

        let last_used = self.tick();
        self.entries.insert(
            id,
            SessionEntry {
                session: Arc::new(Mutex::new(conversation)),
                last_used,
            },
        );
        true
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .entries
            .iter()
            .min_by_key(|(_, entry)| entry.last_used)
            .map(|(id, _)| id.clone());

        if let Some(id) = oldest {
            tracing::info!(session_id = %id, "session table full, evicting least recently used");
            self.entries.remove(&id);
        }
    }

    fn peek(&self, id: &str) -> Option<Session> {
        self.entries.get(id).map(|entry| entry.session.clone())
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Shared server state. Cloning is cheap.
#[derive(Clone)]
pub struct ServerState {
    inner: Arc<Inner>,
    sessions: Arc<Mutex<SessionTable>>,
}

struct Inner {
    api: Api,
    template: Conversation,
    transport: Arc<dyn AsyncTransport>,
    policy: RetryPolicy,
}

impl ServerState {
    /// Acknowledges the seeded `conversation` and uses the result as the template for every
    /// session.
    pub async fn start(
        api: Api,
        mut conversation: Conversation,
        transport: Arc<dyn AsyncTransport>,
        policy: RetryPolicy,
    ) -> Result<Self, ExchangeError> {
        let acknowledgement =
            driver::acknowledge_async(&api, &mut conversation, transport.as_ref(), &policy).await?;
        tracing::info!(
            chars = acknowledgement.len(),
            "corpus acknowledged, template conversation ready"
        );

        Ok(Self::from_template(api, conversation, transport, policy))
    }

    /// Uses an already acknowledged conversation as the session template.
    pub fn from_template(
        api: Api,
        template: Conversation,
        transport: Arc<dyn AsyncTransport>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                api,
                template,
                transport,
                policy,
            }),
            sessions: Arc::new(Mutex::new(SessionTable::new(DEFAULT_MAX_SESSIONS))),
        }
    }

    /// Limits the number of sessions kept in memory. Replaces the session table, so it is meant
    /// to be called before serving.
    pub fn max_sessions(mut self, max_sessions: usize) -> Self {
        self.sessions = Arc::new(Mutex::new(SessionTable::new(max_sessions)));
        self
    }

    /// A snapshot of a session's conversation.
    pub async fn conversation(&self, id: &str) -> Option<Conversation> {
        let session = self.sessions.lock().await.peek(id)?;
        let conversation = session.lock().await;
        Some(conversation.clone())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Asks `message` in session `id`.
    ///
    /// An unknown session starts from the template and is only stored once its first exchange
    /// succeeded.
    async fn ask(&self, id: &str, message: &str) -> Result<String, ExchangeError> {
        let inner = &self.inner;
        let existing = self.sessions.lock().await.get(id);

        match existing {
            Some(session) => {
                let mut conversation = session.lock().await;
                driver::ask_async(
                    &inner.api,
                    &mut conversation,
                    inner.transport.as_ref(),
                    &inner.policy,
                    message,
                )
                .await
            }
            None => {
                let mut conversation = inner.template.clone();
                let response = driver::ask_async(
                    &inner.api,
                    &mut conversation,
                    inner.transport.as_ref(),
                    &inner.policy,
                    message,
                )
                .await?;

                if self.sessions.lock().await.insert(id.to_owned(), conversation) {
                    tracing::info!(session_id = id, "new session");
                } else {
                    tracing::warn!(
                        session_id = id,
                        "session was created concurrently, this exchange is not recorded"
                    );
                }
                Ok(response)
            }
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    /// Kept loose so a non-string message is reported like a missing one.
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub session_id: String,
}

/// Error returned by the chat handler, rendered as `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => {
                tracing::error!("chat failed: {msg}");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
        };

        (status, Json(ErrorBody { error: message })).into_response()
    }
}

impl From<ExchangeError> for ApiError {
    fn from(e: ExchangeError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

/// Builds the application router.
pub fn router(state: ServerState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/chat", post(chat))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn chat(
    State(state): State<ServerState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatReply>, ApiError> {
    let Json(request) = payload?;

    let message = request
        .message
        .as_ref()
        .and_then(Value::as_str)
        .filter(|message| !message.trim().is_empty())
        .ok_or_else(|| ApiError::BadRequest(NO_MESSAGE.to_owned()))?;

    let session_id = request
        .session_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let response = state.ask(&session_id, message).await?;

    Ok(Json(ChatReply {
        response,
        session_id,
    }))
}

#[cfg(test)]
mod tests {
    use super::SessionTable;
    use crate::conversation::Conversation;

    fn ids(table: &SessionTable) -> Vec<String> {
        let mut ids: Vec<_> = table.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut table = SessionTable::new(2);
        assert!(table.insert("a".to_owned(), Conversation::new()));
        assert!(table.insert("b".to_owned(), Conversation::new()));

        // Using "a" makes "b" the oldest.
        assert!(table.get("a").is_some());
        assert!(table.insert("c".to_owned(), Conversation::new()));

        assert_eq!(ids(&table), ["a", "c"]);
        assert!(table.get("b").is_none());
    }

    #[test]
    fn insert_keeps_existing_session() {
        let mut table = SessionTable::new(2);
        let mut conversation = Conversation::new();
        conversation.record_reply("first");
        assert!(table.insert("a".to_owned(), conversation));

        assert!(!table.insert("a".to_owned(), Conversation::new()));
        assert_eq!(table.len(), 1);
        let kept = table.peek("a").unwrap();
        assert_eq!(kept.try_lock().unwrap().len(), 1);
    }

    #[test]
    fn zero_capacity_still_holds_one_session() {
        let mut table = SessionTable::new(0);
        table.insert("a".to_owned(), Conversation::new());
        table.insert("b".to_owned(), Conversation::new());

        assert_eq!(ids(&table), ["b"]);
    }
}
