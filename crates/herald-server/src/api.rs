use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use herald_shared::constants::MAX_ATTACHMENTS;
use herald_shared::{BroadcastId, GroupId, MessageId, UserId};
use herald_store::{
    Broadcast, BroadcastUpdate, DeliveryAttempt, Group, Message, NewUser, User, UserUpdate,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::broadcast::{BroadcastEngine, DispatchRequest};
use crate::config::ServerConfig;
use crate::contact::{ContactReport, ContactResolver};
use crate::conversation::ConversationStore;
use crate::db::SharedDb;
use crate::error::ServerError;
use crate::relay::Relay;
use crate::upload::Upload;
use crate::ws::ws_handler;

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDb,
    pub conversations: ConversationStore,
    pub engine: Arc<BroadcastEngine>,
    pub relay: Arc<Relay>,
    pub contacts: Arc<ContactResolver>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let body_limit = state.config.max_upload_size * MAX_ATTACHMENTS + 1024 * 1024;

    let protected = Router::new()
        .route("/users", get(list_users).post(create_user))
        .route("/users/:id", get(get_user).put(update_user).delete(delete_user))
        .route("/users/:id/messages", get(list_user_messages))
        .route("/groups", get(list_groups).post(create_group))
        .route(
            "/groups/:id",
            get(get_group).patch(update_group).delete(delete_group),
        )
        .route("/broadcasts", get(list_broadcasts).post(create_broadcast))
        .route(
            "/broadcasts/:id",
            get(get_broadcast).put(update_broadcast).delete(delete_broadcast),
        )
        .route("/broadcasts/:id/deliveries", get(list_deliveries))
        .route("/messages/mark-as-read", post(mark_messages_read))
        .route("/bot/:id", post(contact_user))
        .route("/ws", get(ws_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health_check))
        .merge(protected)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ─── Auth ───

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyQuery {
    api_key: Option<String>,
}

/// Checks `x-api-key` (or an `apiKey` query parameter, for browser
/// WebSockets) when an operator key is configured.
async fn require_api_key(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ServerError> {
    if let Some(expected) = &state.config.api_key {
        let provided = api_key_from(req.headers())
            .or_else(|| {
                Query::<ApiKeyQuery>::try_from_uri(req.uri())
                    .ok()
                    .and_then(|Query(q)| q.api_key)
            })
            .unwrap_or_default();
        if !keys_match(&provided, expected) {
            return Err(ServerError::Forbidden("Invalid API key".into()));
        }
    }
    Ok(next.run(req).await)
}

fn api_key_from(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn keys_match(provided: &str, expected: &str) -> bool {
    // Constant-time comparison to prevent timing attacks on the key.
    use subtle::ConstantTimeEq;
    let provided = provided.as_bytes();
    let expected = expected.as_bytes();
    provided.len() == expected.len() && provided.ct_eq(expected).unwrap_u8() == 1
}

// ─── Health ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    sessions: usize,
    rooms: usize,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        sessions: state.relay.session_count().await,
        rooms: state.relay.room_count().await,
    })
}

// ─── Users ───

async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ServerError> {
    Ok(Json(state.db.lock().await.list_users()?))
}

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<NewUser>,
) -> Result<(StatusCode, Json<User>), ServerError> {
    let user = state.db.lock().await.create_user(&req)?;
    info!(user = %user.id, "User created");
    Ok((StatusCode::CREATED, Json(user)))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<User>, ServerError> {
    Ok(Json(state.db.lock().await.get_user(id)?))
}

async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
    Json(req): Json<UserUpdate>,
) -> Result<Json<User>, ServerError> {
    Ok(Json(state.db.lock().await.update_user(id, &req)?))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if !state.db.lock().await.delete_user(id)? {
        return Err(ServerError::NotFound("User".into()));
    }
    info!(user = %id, "User deleted");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn list_user_messages(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<Vec<Message>>, ServerError> {
    state.db.lock().await.get_user(id)?;
    Ok(Json(state.conversations.list_for(id).await?))
}

// ─── Groups ───

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupRequest {
    name: String,
    #[serde(default)]
    member_ids: Vec<UserId>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateGroupRequest {
    name: Option<String>,
    member_ids: Option<Vec<UserId>>,
}

#[derive(Serialize)]
struct GroupDetail {
    #[serde(flatten)]
    group: Group,
    members: Vec<User>,
}

async fn list_groups(State(state): State<AppState>) -> Result<Json<Vec<Group>>, ServerError> {
    Ok(Json(state.db.lock().await.list_groups()?))
}

async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<(StatusCode, Json<Group>), ServerError> {
    let name = req.name.trim();
    if name.is_empty() {
        return Err(ServerError::BadRequest("name must not be empty".into()));
    }
    let group = state.db.lock().await.create_group(name, &req.member_ids)?;
    info!(group = %group.id, members = group.member_ids.len(), "Group created");
    Ok((StatusCode::CREATED, Json(group)))
}

async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<GroupId>,
) -> Result<Json<GroupDetail>, ServerError> {
    let db = state.db.lock().await;
    let group = db.get_group(id)?;
    let members = db.get_group_members(id)?;
    Ok(Json(GroupDetail { group, members }))
}

async fn update_group(
    State(state): State<AppState>,
    Path(id): Path<GroupId>,
    Json(req): Json<UpdateGroupRequest>,
) -> Result<Json<Group>, ServerError> {
    let group = state.db.lock().await.update_group(
        id,
        req.name.as_deref().map(str::trim).filter(|n| !n.is_empty()),
        req.member_ids.as_deref(),
    )?;
    Ok(Json(group))
}

async fn delete_group(
    State(state): State<AppState>,
    Path(id): Path<GroupId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if !state.db.lock().await.delete_group(id)? {
        return Err(ServerError::NotFound("Group".into()));
    }
    info!(group = %id, "Group deleted");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

// ─── Broadcasts ───

async fn list_broadcasts(
    State(state): State<AppState>,
) -> Result<Json<Vec<Broadcast>>, ServerError> {
    Ok(Json(state.db.lock().await.list_broadcasts()?))
}

/// Multipart form: `name`, `message`, `groupIds` (repeated or
/// comma-separated) and up to ten `images` files.
async fn create_broadcast(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<Broadcast>), ServerError> {
    let request = read_broadcast_form(multipart, state.config.max_upload_size).await?;
    let broadcast = state.engine.dispatch(request).await?;
    Ok((StatusCode::CREATED, Json(broadcast)))
}

async fn read_broadcast_form(
    mut multipart: Multipart,
    max_upload_size: usize,
) -> Result<DispatchRequest, ServerError> {
    let mut name = String::new();
    let mut message = String::new();
    let mut group_ids = Vec::new();
    let mut attachments = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServerError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let field_name = field.name().unwrap_or("").to_string();
        match field_name.as_str() {
            "images" => {
                let file_name = field.file_name().unwrap_or("image").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
                if data.len() > max_upload_size {
                    return Err(ServerError::PayloadTooLarge {
                        size: data.len(),
                        max: max_upload_size,
                    });
                }
                attachments.push(Upload {
                    file_name,
                    bytes: data.to_vec(),
                });
                if attachments.len() > MAX_ATTACHMENTS {
                    return Err(ServerError::BadRequest(format!(
                        "At most {MAX_ATTACHMENTS} images are allowed"
                    )));
                }
            }
            other => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ServerError::BadRequest(format!("Failed to read field: {}", e)))?;
                match other {
                    "name" => name = value,
                    "message" => message = value,
                    "groupIds" | "groupIds[]" => group_ids.extend(parse_group_ids(&value)?),
                    _ => debug!(field = %other, "Ignoring unknown multipart field"),
                }
            }
        }
    }

    if name.trim().is_empty() {
        return Err(ServerError::BadRequest("name must not be empty".into()));
    }
    if message.trim().is_empty() {
        return Err(ServerError::BadRequest("message must not be empty".into()));
    }
    if group_ids.is_empty() {
        return Err(ServerError::BadRequest("groupIds must not be empty".into()));
    }

    Ok(DispatchRequest {
        name,
        message,
        group_ids,
        attachments,
    })
}

/// Accepts `a,b`, a single id, or a JSON array of ids.
fn parse_group_ids(raw: &str) -> Result<Vec<GroupId>, ServerError> {
    let raw = raw.trim();
    if raw.starts_with('[') {
        return serde_json::from_str(raw)
            .map_err(|e| ServerError::BadRequest(format!("Invalid groupIds: {e}")));
    }
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<GroupId>()
                .map_err(|e| ServerError::BadRequest(format!("Invalid group id {s:?}: {e}")))
        })
        .collect()
}

async fn get_broadcast(
    State(state): State<AppState>,
    Path(id): Path<BroadcastId>,
) -> Result<Json<Broadcast>, ServerError> {
    Ok(Json(state.db.lock().await.get_broadcast(id)?))
}

async fn update_broadcast(
    State(state): State<AppState>,
    Path(id): Path<BroadcastId>,
    Json(req): Json<BroadcastUpdate>,
) -> Result<Json<Broadcast>, ServerError> {
    Ok(Json(state.db.lock().await.update_broadcast(id, &req)?))
}

async fn delete_broadcast(
    State(state): State<AppState>,
    Path(id): Path<BroadcastId>,
) -> Result<Json<serde_json::Value>, ServerError> {
    if !state.db.lock().await.delete_broadcast(id)? {
        return Err(ServerError::NotFound("Broadcast".into()));
    }
    info!(broadcast = %id, "Broadcast deleted");
    Ok(Json(serde_json::json!({ "deleted": true })))
}

async fn list_deliveries(
    State(state): State<AppState>,
    Path(id): Path<BroadcastId>,
) -> Result<Json<Vec<DeliveryAttempt>>, ServerError> {
    let db = state.db.lock().await;
    db.get_broadcast(id)?;
    Ok(Json(db.list_delivery_attempts(id)?))
}

// ─── Messages ───

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkAsReadRequest {
    message_ids: Vec<MessageId>,
}

#[derive(Serialize)]
struct MarkAsReadResponse {
    updated: usize,
}

async fn mark_messages_read(
    State(state): State<AppState>,
    Json(req): Json<MarkAsReadRequest>,
) -> Result<Json<MarkAsReadResponse>, ServerError> {
    let updated = state.conversations.mark_read(&req.message_ids).await?;
    debug!(requested = req.message_ids.len(), updated, "Messages marked as read");
    Ok(Json(MarkAsReadResponse { updated }))
}

// ─── Operator contact ───

async fn contact_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<ContactReport>, ServerError> {
    let user = state.db.lock().await.get_user(id)?;
    Ok(Json(state.contacts.notify_operator(&user).await))
}
